//! Type system for the Tessel IR.
//!
//! Every field that a pattern may leave open is a [`Slot`]: either a known
//! value or a [`HoleId`] naming the placeholder it binds to during matching.

use crate::expr::Expr;
use crate::task::WARP_SIZE;

/// Identifier of an unresolved placeholder inside a pattern.
///
/// Holes are minted by [`crate::PatternBuilder`], so the ids of one pattern
/// are dense and deterministic.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct HoleId(pub(crate) u32);

impl HoleId {
    /// Returns the raw index of this hole.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A possibly-unresolved field.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Slot<T> {
    /// Resolved to a concrete value.
    Known(T),
    /// Not yet resolved; binds to a concrete value during matching.
    Hole(HoleId),
}

impl<T> Slot<T> {
    /// Returns the resolved value, if any.
    pub fn known(&self) -> Option<&T> {
        match self {
            Self::Known(v) => Some(v),
            Self::Hole(_) => None,
        }
    }

    /// Returns the hole id when unresolved.
    pub fn hole(&self) -> Option<HoleId> {
        match self {
            Self::Known(_) => None,
            Self::Hole(h) => Some(*h),
        }
    }

    /// Returns `true` if this slot carries a concrete value.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl<T> From<T> for Slot<T> {
    fn from(value: T) -> Self {
        Self::Known(value)
    }
}

/// A primitive scalar data type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum DataType {
    Bool,
    Int32,
    Int64,
    Float16,
    Float32,
    Float64,
}

impl DataType {
    /// Canonical name used by the text form.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float16 => "float16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float16 | Self::Float32 | Self::Float64)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Self::Int32 | Self::Int64)
    }

    /// Result type of arithmetic mixing `self` and `other`.
    ///
    /// Within one kind the wider type wins. Mixing integers with floats gives
    /// a float at least as wide as the integer, so `int64` with `float16`
    /// yields `float64`. `bool` takes the other operand's type.
    pub fn promote(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Bool, x) | (x, Self::Bool) => x,
            (a, b) if a.is_float() == b.is_float() => {
                if a.bytes() >= b.bytes() { a } else { b }
            }
            (a, b) => {
                let (float, int) = if a.is_float() { (a, b) } else { (b, a) };
                match (float.bytes() >= int.bytes(), int) {
                    (true, _) => float,
                    (false, Self::Int32) => Self::Float32,
                    (false, _) => Self::Float64,
                }
            }
        }
    }

    /// Storage width in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Float16 => 2,
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 => 8,
        }
    }
}

/// A scalar type. `Slot::Hole` is the unresolved state patterns use.
pub type ScalarType = Slot<DataType>;

/// How the lanes of a warp tile a logical tensor with their registers.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum RegisterLayout {
    /// Every lane holds the whole tensor; local and global indices coincide.
    Identity,
    /// Lanes form a row-major grid of shape `lanes`; lane coordinates
    /// interleave with the local index: `global = local * lanes + lane`.
    Cyclic { lanes: Vec<i64> },
    /// Each lane owns a contiguous block: `global = lane * local_extent + local`.
    Blocked { lanes: Vec<i64> },
}

/// Describes how a warp's per-lane registers map to a shared logical index space.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct RegisterScope {
    /// Shape of the register array held by one lane.
    pub local_shape: Vec<i64>,
    /// Mapping from (lane, local index) to global index.
    pub layout: RegisterLayout,
}

impl RegisterScope {
    pub fn identity(local_shape: Vec<i64>) -> Self {
        Self {
            local_shape,
            layout: RegisterLayout::Identity,
        }
    }

    pub fn cyclic(local_shape: Vec<i64>, lanes: Vec<i64>) -> Self {
        Self {
            local_shape,
            layout: RegisterLayout::Cyclic { lanes },
        }
    }

    pub fn blocked(local_shape: Vec<i64>, lanes: Vec<i64>) -> Self {
        Self {
            local_shape,
            layout: RegisterLayout::Blocked { lanes },
        }
    }

    fn lanes(&self) -> Option<&[i64]> {
        match &self.layout {
            RegisterLayout::Identity => None,
            RegisterLayout::Cyclic { lanes } | RegisterLayout::Blocked { lanes } => Some(lanes),
        }
    }

    /// Number of lanes that participate in the layout.
    pub fn num_lanes(&self) -> i64 {
        self.lanes().map_or(1, |l| l.iter().product())
    }

    /// Shape of the logical tensor the warp holds collectively.
    pub fn global_shape(&self) -> Vec<i64> {
        match self.lanes() {
            None => self.local_shape.clone(),
            Some(lanes) => self
                .local_shape
                .iter()
                .zip(lanes)
                .map(|(l, n)| l * n)
                .collect(),
        }
    }

    /// Returns `true` if the layout is well formed: lane grid rank matches the
    /// local rank and the lane grid fits in one warp.
    pub fn is_valid(&self) -> bool {
        match self.lanes() {
            None => true,
            Some(lanes) => {
                lanes.len() == self.local_shape.len()
                    && lanes.iter().all(|&n| n > 0)
                    && self.num_lanes() <= WARP_SIZE
            }
        }
    }

    /// Global tensor indices held in register `local` by lane `lane_id`.
    pub fn local2global(&self, lane_id: &Expr, local: &[i64]) -> Vec<Expr> {
        let Some(lanes) = self.lanes() else {
            return local.iter().map(|&i| Expr::int(i)).collect();
        };
        let coords = lane_coordinates(lane_id, lanes);
        local
            .iter()
            .zip(coords)
            .enumerate()
            .map(|(dim, (&idx, coord))| match &self.layout {
                RegisterLayout::Cyclic { .. } => Expr::int(idx * lanes[dim]) + coord,
                _ => coord * Expr::int(self.local_shape[dim]) + Expr::int(idx),
            })
            .collect()
    }
}

/// Row-major decomposition of a lane id over a lane grid.
fn lane_coordinates(lane_id: &Expr, lanes: &[i64]) -> Vec<Expr> {
    let mut coords = Vec::with_capacity(lanes.len());
    let mut inner: i64 = lanes.iter().product();
    for &extent in lanes {
        inner /= extent;
        let coord = if inner == 1 {
            lane_id.clone() % Expr::int(extent)
        } else {
            (lane_id.clone() / Expr::int(inner)) % Expr::int(extent)
        };
        coords.push(coord);
    }
    coords
}

/// Where a tensor lives.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum MemoryScope {
    /// Device global memory.
    Global,
    /// Block-shared scratch memory.
    Shared,
    /// Thread-private local memory.
    Local,
    /// Distributed over the registers of a warp.
    Register(Slot<RegisterScope>),
}

impl MemoryScope {
    pub fn is_resolved(&self) -> bool {
        match self {
            Self::Register(slot) => slot.is_resolved(),
            _ => true,
        }
    }
}

/// A tensor type: element type, shape, scope and optional strides.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorType {
    pub scope: Slot<MemoryScope>,
    pub dtype: ScalarType,
    /// `None` leaves the shape unconstrained (patterns only).
    pub shape: Option<Vec<Expr>>,
    /// `None` means row-major.
    pub strides: Option<Vec<Expr>>,
}

impl TensorType {
    /// A fully resolved row-major tensor type.
    pub fn new(scope: MemoryScope, dtype: DataType, shape: &[i64]) -> Self {
        Self {
            scope: Slot::Known(scope),
            dtype: Slot::Known(dtype),
            shape: Some(shape.iter().map(|&d| Expr::int(d)).collect()),
            strides: None,
        }
    }

    pub fn with_strides(mut self, strides: &[i64]) -> Self {
        self.strides = Some(strides.iter().map(|&s| Expr::int(s)).collect());
        self
    }

    pub fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(Vec::len)
    }

    /// Shape as integers when every extent is a constant.
    pub fn const_shape(&self) -> Option<Vec<i64>> {
        self.shape.as_ref()?.iter().map(Expr::as_int).collect()
    }

    /// Effective strides: the declared ones, or row-major over the shape.
    pub fn effective_strides(&self) -> Option<Vec<Expr>> {
        if let Some(strides) = &self.strides {
            return Some(strides.clone());
        }
        let shape = self.shape.as_ref()?;
        let mut strides = vec![Expr::int(1); shape.len()];
        for k in (0..shape.len().saturating_sub(1)).rev() {
            strides[k] = match (strides[k + 1].as_int(), shape[k + 1].as_int()) {
                (Some(s), Some(d)) => Expr::int(s * d),
                _ => strides[k + 1].clone() * shape[k + 1].clone(),
            };
        }
        Some(strides)
    }

    pub fn is_resolved(&self) -> bool {
        self.scope.known().is_some_and(MemoryScope::is_resolved)
            && self.dtype.is_resolved()
            && self
                .shape
                .as_ref()
                .is_some_and(|s| s.iter().all(Expr::is_resolved))
            && self
                .strides
                .as_ref()
                .is_none_or(|s| s.iter().all(Expr::is_resolved))
    }
}

/// A type in the IR.
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Scalar(ScalarType),
    Tensor(TensorType),
    Pointer(Box<Type>),
    Reference(Box<Type>),
    TensorPointer(TensorType),
    Void,
}

impl Type {
    pub fn scalar(dtype: DataType) -> Self {
        Self::Scalar(Slot::Known(dtype))
    }

    pub fn pointer(base: Type) -> Self {
        Self::Pointer(Box::new(base))
    }

    /// Element type of a scalar, tensor or tensor pointer.
    pub fn scalar_type(&self) -> Option<&ScalarType> {
        match self {
            Self::Scalar(s) => Some(s),
            Self::Tensor(t) | Self::TensorPointer(t) => Some(&t.dtype),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Self::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self, Self::Tensor(_))
    }

    /// Returns `true` if no field of this type is a pattern hole.
    pub fn is_resolved(&self) -> bool {
        match self {
            Self::Scalar(s) => s.is_resolved(),
            Self::Tensor(t) | Self::TensorPointer(t) => t.is_resolved(),
            Self::Pointer(b) | Self::Reference(b) => b.is_resolved(),
            Self::Void => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_keeps_integer_range() {
        use DataType::*;
        assert_eq!(Int32.promote(Int64), Int64);
        assert_eq!(Float32.promote(Float16), Float32);
        assert_eq!(Int32.promote(Float32), Float32);
        assert_eq!(Int32.promote(Float16), Float32);
        assert_eq!(Int64.promote(Float16), Float64);
        assert_eq!(Float32.promote(Int64), Float64);
        assert_eq!(Bool.promote(Int32), Int32);
    }

    #[test]
    fn slot_accessors() {
        let known: ScalarType = DataType::Float32.into();
        assert_eq!(known.known(), Some(&DataType::Float32));
        assert!(known.hole().is_none());

        let hole: ScalarType = Slot::Hole(HoleId(3));
        assert!(!hole.is_resolved());
        assert_eq!(hole.hole(), Some(HoleId(3)));
    }

    #[test]
    fn row_major_strides() {
        let ty = TensorType::new(MemoryScope::Global, DataType::Float32, &[2, 3, 4]);
        let strides: Vec<_> = ty
            .effective_strides()
            .unwrap()
            .iter()
            .map(|e| e.as_int().unwrap())
            .collect();
        assert_eq!(strides, vec![12, 4, 1]);
    }

    #[test]
    fn declared_strides_win() {
        let ty = TensorType::new(MemoryScope::Shared, DataType::Float32, &[4, 4]).with_strides(&[1, 4]);
        let strides: Vec<_> = ty
            .effective_strides()
            .unwrap()
            .iter()
            .map(|e| e.as_int().unwrap())
            .collect();
        assert_eq!(strides, vec![1, 4]);
    }

    #[test]
    fn register_hole_is_unresolved() {
        let ty = TensorType {
            scope: Slot::Known(MemoryScope::Register(Slot::Hole(HoleId(0)))),
            dtype: DataType::Float32.into(),
            shape: Some(vec![Expr::int(2)]),
            strides: None,
        };
        assert!(!ty.is_resolved());
        assert!(!Type::Tensor(ty).is_resolved());
    }

    #[test]
    fn identity_scope_ignores_lane() {
        let rs = RegisterScope::identity(vec![2, 2]);
        let lane = Expr::int(7);
        let globals = rs.local2global(&lane, &[1, 0]);
        assert_eq!(globals, vec![Expr::int(1), Expr::int(0)]);
        assert_eq!(rs.global_shape(), vec![2, 2]);
        assert_eq!(rs.num_lanes(), 1);
    }

    #[test]
    fn cyclic_scope_shape() {
        let rs = RegisterScope::cyclic(vec![2, 2], vec![4, 8]);
        assert!(rs.is_valid());
        assert_eq!(rs.global_shape(), vec![8, 16]);
        assert_eq!(rs.num_lanes(), 32);
        assert_eq!(rs.local2global(&Expr::int(0), &[0, 0]).len(), 2);
    }

    #[test]
    fn oversized_lane_grid_is_invalid() {
        assert!(!RegisterScope::blocked(vec![1, 1], vec![8, 8]).is_valid());
        assert!(!RegisterScope::blocked(vec![1], vec![4, 8]).is_valid());
    }

    #[test]
    fn data_type_properties() {
        assert!(DataType::Float16.is_float());
        assert!(DataType::Int64.is_integer());
        assert!(!DataType::Bool.is_integer());
        assert_eq!(DataType::Float64.bytes(), 8);
        assert_eq!(DataType::Int32.name(), "int32");
    }
}
