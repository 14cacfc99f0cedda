//! The closed set of value types recognized by the IR.
//!
//! A [`Type`] is deliberately kept `Copy` and cheap: scalar and vector shapes
//! are represented inline, while the only two shapes that need extra storage
//! -- pointers and structs -- hold an index into a [`TypePool`] owned by the
//! [`Function`](super::Function) that declared them.

use core::fmt;

/// A scalar lane kind: the element type of a vector, or a bare scalar.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ScalarKind {
    Int,
    Float,
}

/// An interned pointer or struct type, indexing into a function's [`TypePool`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TypeId(pub u32);

/// One field of a struct type: offset in bytes from the start of the struct.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct StructField {
    pub ty: Type,
    pub offset: u32,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypePoolEntry {
    /// Pointer to the given pointee type.
    Pointer(Type),
    /// Struct with an ordered, explicitly offset field list.
    Struct(Vec<StructField>),
}

/// Owns the out-of-line data for pointer and struct types declared by a function.
#[derive(Clone, Default, Debug)]
pub struct TypePool {
    entries: Vec<TypePoolEntry>,
}

impl TypePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn declare_pointer(&mut self, pointee: Type) -> Type {
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(TypePoolEntry::Pointer(pointee));
        Type::Pointer(id)
    }

    pub fn declare_struct(&mut self, fields: Vec<StructField>) -> Type {
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(TypePoolEntry::Struct(fields));
        Type::Struct(id)
    }

    pub fn pointee(&self, id: TypeId) -> Type {
        match &self.entries[id.0 as usize] {
            TypePoolEntry::Pointer(pointee) => *pointee,
            TypePoolEntry::Struct(_) => panic!("type id does not name a pointer"),
        }
    }

    pub fn fields(&self, id: TypeId) -> &[StructField] {
        match &self.entries[id.0 as usize] {
            TypePoolEntry::Struct(fields) => fields,
            TypePoolEntry::Pointer(_) => panic!("type id does not name a struct"),
        }
    }
}

/// The closed tagged union of types recognized by the IR.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// The default, invalid type. Never legal on a verified function.
    Invalid,
    /// An integer of the given bit width: one of 8, 16, 32, 64, 128.
    Int(u16),
    /// A float of the given bit width: one of 16, 32, 64, 128.
    Float(u16),
    /// A fixed-length vector: `lane_bits(lane) * lanes` must be a power of
    /// two no greater than 256.
    Vector { lane: Lane, lanes: u16 },
    /// A pointer to the interned pointee type.
    Pointer(TypeId),
    /// An interned struct type: an ordered field list with byte offsets.
    Struct(TypeId),
}

/// The scalar element of a vector type: never itself a vector.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Lane {
    Int(u16),
    Float(u16),
}

impl Lane {
    pub fn bits(self) -> u16 {
        match self {
            Lane::Int(b) | Lane::Float(b) => b,
        }
    }

    pub fn kind(self) -> ScalarKind {
        match self {
            Lane::Int(_) => ScalarKind::Int,
            Lane::Float(_) => ScalarKind::Float,
        }
    }

    fn as_scalar_type(self) -> Type {
        match self {
            Lane::Int(b) => Type::Int(b),
            Lane::Float(b) => Type::Float(b),
        }
    }
}

pub const I8: Type = Type::Int(8);
pub const I16: Type = Type::Int(16);
pub const I32: Type = Type::Int(32);
pub const I64: Type = Type::Int(64);
pub const I128: Type = Type::Int(128);
pub const F16: Type = Type::Float(16);
pub const F32: Type = Type::Float(32);
pub const F64: Type = Type::Float(64);
pub const F128: Type = Type::Float(128);

const INT_WIDTHS: [u16; 5] = [8, 16, 32, 64, 128];
const FLOAT_WIDTHS: [u16; 4] = [16, 32, 64, 128];

impl Type {
    /// Total width of this type in bits, given the pool that owns any
    /// pointer/struct entries it may reference.
    ///
    /// Pointers are always pointer-width (64 bits on every target this
    /// back end supports); struct width is the sum of its layout (the last
    /// field's offset plus its own width, assuming no trailing padding).
    pub fn bits(self, pool: &TypePool) -> u32 {
        match self {
            Type::Invalid => 0,
            Type::Int(b) | Type::Float(b) => b as u32,
            Type::Vector { lane, lanes } => lane.bits() as u32 * lanes as u32,
            Type::Pointer(_) => 64,
            Type::Struct(id) => {
                let fields = pool.fields(id);
                fields
                    .iter()
                    .map(|f| f.offset * 8 + f.ty.bits(pool))
                    .max()
                    .unwrap_or(0)
            }
        }
    }

    pub fn bytes(self, pool: &TypePool) -> u32 {
        debug_assert_eq!(self.bits(pool) % 8, 0, "non-byte-aligned type width");
        self.bits(pool) / 8
    }

    pub fn is_vector(self) -> bool {
        matches!(self, Type::Vector { .. })
    }

    pub fn is_int(self) -> bool {
        matches!(self, Type::Int(_))
            || matches!(self, Type::Vector { lane: Lane::Int(_), .. })
    }

    pub fn is_float(self) -> bool {
        matches!(self, Type::Float(_))
            || matches!(self, Type::Vector { lane: Lane::Float(_), .. })
    }

    pub fn lane_count(self) -> u16 {
        match self {
            Type::Vector { lanes, .. } => lanes,
            _ => 1,
        }
    }

    pub fn lane_type(self) -> Type {
        match self {
            Type::Vector { lane, .. } => lane.as_scalar_type(),
            other => other,
        }
    }

    /// The next-wider type in the same family (int or float), if one exists.
    /// Used to verify/implement `fpromote`/`sextend`/`uextend`.
    pub fn double_width(self) -> Option<Type> {
        match self {
            Type::Int(b) => next_width(&INT_WIDTHS, b).map(Type::Int),
            Type::Float(b) => next_width(&FLOAT_WIDTHS, b).map(Type::Float),
            Type::Vector { lane: Lane::Int(b), lanes } => {
                next_width(&INT_WIDTHS, b).map(|b| Type::Vector { lane: Lane::Int(b), lanes })
            }
            Type::Vector { lane: Lane::Float(b), lanes } => {
                next_width(&FLOAT_WIDTHS, b).map(|b| Type::Vector { lane: Lane::Float(b), lanes })
            }
            _ => None,
        }
    }

    /// The next-narrower type in the same family, if one exists. Used by
    /// `fdemote`/`ireduce`.
    pub fn half_width(self) -> Option<Type> {
        match self {
            Type::Int(b) => prev_width(&INT_WIDTHS, b).map(Type::Int),
            Type::Float(b) => prev_width(&FLOAT_WIDTHS, b).map(Type::Float),
            Type::Vector { lane: Lane::Int(b), lanes } => {
                prev_width(&INT_WIDTHS, b).map(|b| Type::Vector { lane: Lane::Int(b), lanes })
            }
            Type::Vector { lane: Lane::Float(b), lanes } => {
                prev_width(&FLOAT_WIDTHS, b).map(|b| Type::Vector { lane: Lane::Float(b), lanes })
            }
            _ => None,
        }
    }

    /// Maps floats to the same-width integer, pointwise over lanes. Integers
    /// and pointers map to themselves.
    pub fn as_int(self) -> Type {
        match self {
            Type::Float(b) => Type::Int(b),
            Type::Vector { lane: Lane::Float(b), lanes } => Type::Vector { lane: Lane::Int(b), lanes },
            other => other,
        }
    }

    /// The type a comparison against this type yields: `I8` for scalars, or
    /// an int-lane vector of the same shape for vectors.
    pub fn as_truthy(self) -> Type {
        match self {
            Type::Vector { lane, lanes } => Type::Vector { lane: Lane::Int(lane.bits()), lanes },
            _ => I8,
        }
    }
}

fn next_width(table: &[u16], bits: u16) -> Option<u16> {
    let idx = table.iter().position(|&b| b == bits)?;
    table.get(idx + 1).copied()
}

fn prev_width(table: &[u16], bits: u16) -> Option<u16> {
    let idx = table.iter().position(|&b| b == bits)?;
    idx.checked_sub(1).map(|i| table[i])
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Type::Invalid => write!(f, "invalid"),
            Type::Int(b) => write!(f, "i{b}"),
            Type::Float(b) => write!(f, "f{b}"),
            Type::Vector { lane, lanes } => write!(f, "{}x{lanes}", LaneDisplay(lane)),
            Type::Pointer(id) => write!(f, "ptr#{}", id.0),
            Type::Struct(id) => write!(f, "struct#{}", id.0),
        }
    }
}

struct LaneDisplay(Lane);
impl fmt::Display for LaneDisplay {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Lane::Int(b) => write!(f, "i{b}"),
            Lane::Float(b) => write!(f, "f{b}"),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_bits_invariant() {
        let v = Type::Vector { lane: Lane::Int(32), lanes: 4 };
        assert_eq!(v.bits(&TypePool::new()), 128);
    }

    #[test]
    fn width_neighbors() {
        assert_eq!(I32.double_width(), Some(I64));
        assert_eq!(I8.half_width(), None);
        assert_eq!(F32.double_width(), Some(F64));
        assert_eq!(F128.double_width(), None);
    }

    #[test]
    fn as_int_maps_float_lanes() {
        let v = Type::Vector { lane: Lane::Float(32), lanes: 4 };
        assert_eq!(v.as_int(), Type::Vector { lane: Lane::Int(32), lanes: 4 });
    }

    #[test]
    fn pointer_and_struct_bits() {
        let mut pool = TypePool::new();
        let ptr = pool.declare_pointer(I32);
        assert_eq!(ptr.bits(&pool), 64);

        let st = pool.declare_struct(vec![
            StructField { ty: I32, offset: 0 },
            StructField { ty: I64, offset: 8 },
        ]);
        assert_eq!(st.bits(&pool), 8 * 8 + 64);
    }
}
