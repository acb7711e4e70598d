//! Runtime values and the conversion/arithmetic traits the interpreter
//! dispatches through.

use crate::error::ErrorKind;
use crate::nan_canonical_float::{F32, F64};
use core::fmt;

/// Type of a runtime value.
///
/// A closed set: `i32`, `i64`, `f32` and `f64`. The validator additionally
/// works with a stack-polymorphic `any` marker, but that marker never escapes
/// validation and is therefore not part of this enum.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 32-bit signed or unsigned integer.
    I32,
    /// 64-bit signed or unsigned integer.
    I64,
    /// 32-bit IEEE 754-2008 floating point number.
    F32,
    /// 64-bit IEEE 754-2008 floating point number.
    F64,
}

impl ValueType {
    /// Size of a value of this type in bytes (4 or 8).
    pub fn size(self) -> u32 {
        match self {
            ValueType::I32 | ValueType::F32 => 4,
            ValueType::I64 | ValueType::F64 => 8,
        }
    }

    /// Number of 4-byte value-stack cells a value of this type occupies.
    pub fn cell_count(self) -> u32 {
        self.size() / 4
    }

    /// Whether a value of this type occupies two cells.
    pub fn is_64bit(self) -> bool {
        self.size() == 8
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Runtime representation of a value.
///
/// Wasm code manipulates values of the four basic value types: integers and
/// floating-point (IEEE 754-2008) data of 32 or 64 bit width each.
///
/// There is no distinction between signed and unsigned integer types. Instead,
/// integers are interpreted by respective operations as either unsigned or
/// signed in two's complement representation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    /// Value of 32-bit signed or unsigned integer.
    I32(i32),
    /// Value of 64-bit signed or unsigned integer.
    I64(i64),
    /// Value of 32-bit IEEE 754-2008 floating point number.
    F32(F32),
    /// Value of 64-bit IEEE 754-2008 floating point number.
    F64(F64),
}

impl Value {
    /// Creates new default value of given type.
    pub fn default(value_type: ValueType) -> Self {
        match value_type {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0f32.into()),
            ValueType::F64 => Value::F64(0f64.into()),
        }
    }

    /// Creates new value by interpreting passed u32 as f32.
    pub fn decode_f32(val: u32) -> Self {
        Value::F32(F32::from_bits(val))
    }

    /// Creates new value by interpreting passed u64 as f64.
    pub fn decode_f64(val: u64) -> Self {
        Value::F64(F64::from_bits(val))
    }

    /// Get variable type for this value.
    pub fn value_type(&self) -> ValueType {
        match *self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
        }
    }

    /// Returns `T` if this particular [`Value`] contains the appropriate type.
    ///
    /// See [`FromValue`] for details.
    pub fn try_into<T: FromValue>(self) -> Option<T> {
        FromValue::from_value(self)
    }

    /// Returns the value as its untyped 64-bit representation (zero-extended
    /// for 32-bit payloads).
    pub fn to_bits(self) -> u64 {
        match self {
            Value::I32(v) => v as u32 as u64,
            Value::I64(v) => v as u64,
            Value::F32(v) => v.to_bits() as u64,
            Value::F64(v) => v.to_bits(),
        }
    }

    /// Reassembles a value of the given type from its untyped representation.
    pub fn from_bits(ty: ValueType, bits: u64) -> Self {
        match ty {
            ValueType::I32 => Value::I32(bits as u32 as i32),
            ValueType::I64 => Value::I64(bits as i64),
            ValueType::F32 => Value::decode_f32(bits as u32),
            ValueType::F64 => Value::decode_f64(bits),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{}:i32", v),
            Value::I64(v) => write!(f, "{}:i64", v),
            Value::F32(v) => write!(f, "{}:f32", v),
            Value::F64(v) => write!(f, "{}:f64", v),
        }
    }
}

/// Trait for creating a value from a [`Value`].
///
/// Typically each implementation can create a value from the specific type.
/// For example, values of type `bool` or `u32` are both represented by
/// [`Value::I32`] and `f64` values are represented by [`Value::F64`].
pub trait FromValue
where
    Self: Sized,
{
    /// Create a value of type `Self` from a given [`Value`].
    ///
    /// Returns `None` if the [`Value`] is of type different than expected by
    /// the conversion in question.
    fn from_value(val: Value) -> Option<Self>;
}

/// Convert one type to another by wrapping.
pub trait WrapInto<T> {
    /// Convert one type to another by wrapping.
    fn wrap_into(self) -> T;
}

/// Convert one type to another by rounding to the nearest integer towards
/// zero.
///
/// Traps with [`ErrorKind::InvalidConversionToInteger`] on NaN input and with
/// [`ErrorKind::IntegerOverflow`] when the truncated value falls outside the
/// target range. The two cases are deliberately distinct.
pub trait TryTruncateInto<T, E> {
    /// Convert one type to another by rounding to the nearest integer towards
    /// zero.
    fn try_truncate_into(self) -> Result<T, E>;
}

/// Convert one type to another by extending with leading zeroes (or sign
/// bits, for signed sources).
pub trait ExtendInto<T> {
    /// Convert one type to another by extending with leading zeroes.
    fn extend_into(self) -> T;
}

/// Reinterprets the bits of a value of one type as another type.
pub trait TransmuteInto<T> {
    /// Reinterprets the bits of a value of one type as another type.
    fn transmute_into(self) -> T;
}

/// Convert from and to little endian.
pub trait LittleEndianConvert
where
    Self: Sized,
{
    /// The little-endian byte representation.
    type Bytes: Default + AsRef<[u8]> + AsMut<[u8]>;

    /// Converts `Self` into its little-endian byte representation.
    fn into_le_bytes(self) -> Self::Bytes;

    /// Converts the little-endian byte representation back into `Self`.
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
}

/// Arithmetic operations.
pub trait ArithmeticOps<T>: Copy {
    /// Add two values.
    fn add(self, other: T) -> T;
    /// Subtract two values.
    fn sub(self, other: T) -> T;
    /// Multiply two values.
    fn mul(self, other: T) -> T;
    /// Divide two values.
    fn div(self, other: T) -> Result<T, ErrorKind>;
}

/// Integer value.
pub trait Integer<T>: ArithmeticOps<T> {
    /// Counts leading zeros in the bitwise representation of the value.
    fn leading_zeros(self) -> T;
    /// Counts trailing zeros in the bitwise representation of the value.
    fn trailing_zeros(self) -> T;
    /// Counts 1-bits in the bitwise representation of the value.
    fn count_ones(self) -> T;
    /// Get left bit rotation result.
    fn rotl(self, other: T) -> T;
    /// Get right bit rotation result.
    fn rotr(self, other: T) -> T;
    /// Get division remainder.
    fn rem(self, other: T) -> Result<T, ErrorKind>;
}

/// Float-point value.
pub trait Float<T>: ArithmeticOps<T> {
    /// Get absolute value.
    fn abs(self) -> T;
    /// Returns the largest integer less than or equal to a number.
    fn floor(self) -> T;
    /// Returns the smallest integer greater than or equal to a number.
    fn ceil(self) -> T;
    /// Returns the integer part of a number.
    fn trunc(self) -> T;
    /// Returns the nearest integer to a number. Ties are rounded to even.
    fn nearest(self) -> T;
    /// Takes the square root of a number.
    fn sqrt(self) -> T;
    /// Returns the minimum of the two numbers.
    fn min(self, other: T) -> T;
    /// Returns the maximum of the two numbers.
    fn max(self, other: T) -> T;
    /// Sets sign of this value to the sign of other value.
    fn copysign(self, other: T) -> T;
}

impl From<i8> for Value {
    fn from(val: i8) -> Self {
        Value::I32(val as i32)
    }
}

impl From<i16> for Value {
    fn from(val: i16) -> Self {
        Value::I32(val as i32)
    }
}

impl From<i32> for Value {
    fn from(val: i32) -> Self {
        Value::I32(val)
    }
}

impl From<i64> for Value {
    fn from(val: i64) -> Self {
        Value::I64(val)
    }
}

impl From<u8> for Value {
    fn from(val: u8) -> Self {
        Value::I32(val as i32)
    }
}

impl From<u16> for Value {
    fn from(val: u16) -> Self {
        Value::I32(val as i32)
    }
}

impl From<u32> for Value {
    fn from(val: u32) -> Self {
        Value::I32(val as i32)
    }
}

impl From<u64> for Value {
    fn from(val: u64) -> Self {
        Value::I64(val as i64)
    }
}

impl From<f32> for Value {
    fn from(val: f32) -> Self {
        Value::F32(val.into())
    }
}

impl From<f64> for Value {
    fn from(val: f64) -> Self {
        Value::F64(val.into())
    }
}

impl From<F32> for Value {
    fn from(val: F32) -> Self {
        Value::F32(val)
    }
}

impl From<F64> for Value {
    fn from(val: F64) -> Self {
        Value::F64(val)
    }
}

macro_rules! impl_from_value {
    ($expected_rt_ty: ident, $into: ty) => {
        impl FromValue for $into {
            fn from_value(val: Value) -> Option<Self> {
                match val {
                    Value::$expected_rt_ty(val) => Some(val.transmute_into()),
                    _ => None,
                }
            }
        }
    };
}

/// This conversion assumes that boolean values are represented by
/// [`Value::I32`] type.
impl FromValue for bool {
    fn from_value(val: Value) -> Option<Self> {
        match val {
            Value::I32(val) => Some(val != 0),
            _ => None,
        }
    }
}

impl_from_value!(I32, i32);
impl_from_value!(I64, i64);
impl_from_value!(F32, F32);
impl_from_value!(I32, u32);
impl_from_value!(I64, u64);

impl FromValue for F64 {
    fn from_value(val: Value) -> Option<Self> {
        match val {
            Value::F64(val) => Some(val),
            _ => None,
        }
    }
}

impl FromValue for f32 {
    fn from_value(val: Value) -> Option<Self> {
        match val {
            Value::F32(val) => Some(val.to_float()),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    fn from_value(val: Value) -> Option<Self> {
        match val {
            Value::F64(val) => Some(val.to_float()),
            _ => None,
        }
    }
}

macro_rules! impl_wrap_into {
    ($from:ident, $into:ident) => {
        impl WrapInto<$into> for $from {
            fn wrap_into(self) -> $into {
                self as $into
            }
        }
    };
}

impl_wrap_into!(i32, i8);
impl_wrap_into!(i32, i16);
impl_wrap_into!(i64, i8);
impl_wrap_into!(i64, i16);
impl_wrap_into!(i64, i32);

impl WrapInto<F32> for F64 {
    /// Demotion; the result is canonicalised when it is a NaN.
    fn wrap_into(self) -> F32 {
        F32::canonicalized(self.to_float() as f32)
    }
}

macro_rules! impl_try_truncate_into {
    ($from:ty, $into:ty, $low_exclusive:expr, $high_exclusive:expr) => {
        impl TryTruncateInto<$into, ErrorKind> for $from {
            fn try_truncate_into(self) -> Result<$into, ErrorKind> {
                if self.is_nan() {
                    return Err(ErrorKind::InvalidConversionToInteger);
                }
                let trunc = self.trunc();
                // The bounds are bit-exact per float type and target width:
                // both are representable in the source type, and the valid
                // truncated range lies strictly between them.
                if !(trunc > $low_exclusive && trunc < $high_exclusive) {
                    return Err(ErrorKind::IntegerOverflow);
                }
                Ok(trunc as $into)
            }
        }
    };
}

impl_try_truncate_into!(f32, i32, -2147483904.0f32, 2147483648.0f32);
impl_try_truncate_into!(f32, u32, -1.0f32, 4294967296.0f32);
impl_try_truncate_into!(f32, i64, -9223373136366403584.0f32, 9223372036854775808.0f32);
impl_try_truncate_into!(f32, u64, -1.0f32, 18446744073709551616.0f32);
impl_try_truncate_into!(f64, i32, -2147483649.0f64, 2147483648.0f64);
impl_try_truncate_into!(f64, u32, -1.0f64, 4294967296.0f64);
impl_try_truncate_into!(f64, i64, -9223372036854777856.0f64, 9223372036854775808.0f64);
impl_try_truncate_into!(f64, u64, -1.0f64, 18446744073709551616.0f64);

macro_rules! impl_try_truncate_into_wrapped {
    ($from:ident, $intermediate:ident, $into:ident) => {
        impl TryTruncateInto<$into, ErrorKind> for $from {
            fn try_truncate_into(self) -> Result<$into, ErrorKind> {
                $intermediate::from(self).try_truncate_into()
            }
        }
    };
}

impl_try_truncate_into_wrapped!(F32, f32, i32);
impl_try_truncate_into_wrapped!(F32, f32, i64);
impl_try_truncate_into_wrapped!(F32, f32, u32);
impl_try_truncate_into_wrapped!(F32, f32, u64);
impl_try_truncate_into_wrapped!(F64, f64, i32);
impl_try_truncate_into_wrapped!(F64, f64, i64);
impl_try_truncate_into_wrapped!(F64, f64, u32);
impl_try_truncate_into_wrapped!(F64, f64, u64);

macro_rules! impl_extend_into {
    ($from:ident, $into:ident) => {
        impl ExtendInto<$into> for $from {
            fn extend_into(self) -> $into {
                self as $into
            }
        }
    };
    ($from:ident, $intermediate:ident, $into:ident) => {
        impl ExtendInto<$into> for $from {
            fn extend_into(self) -> $into {
                $into::from(self as $intermediate)
            }
        }
    };
}

impl_extend_into!(i8, i32);
impl_extend_into!(u8, i32);
impl_extend_into!(i16, i32);
impl_extend_into!(u16, i32);
impl_extend_into!(i8, i64);
impl_extend_into!(u8, i64);
impl_extend_into!(i16, i64);
impl_extend_into!(u16, i64);
impl_extend_into!(i32, i64);
impl_extend_into!(u32, i64);
impl_extend_into!(u32, u64);
impl_extend_into!(i32, f32, F32);
impl_extend_into!(i32, f64, F64);
impl_extend_into!(u32, f32, F32);
impl_extend_into!(u32, f64, F64);
impl_extend_into!(i64, f32, F32);
impl_extend_into!(i64, f64, F64);
impl_extend_into!(u64, f32, F32);
impl_extend_into!(u64, f64, F64);

impl ExtendInto<F64> for F32 {
    /// Promotion; the result is canonicalised when it is a NaN.
    fn extend_into(self) -> F64 {
        F64::canonicalized(self.to_float() as f64)
    }
}

macro_rules! impl_transmute_into_self {
    ($type:ident) => {
        impl TransmuteInto<$type> for $type {
            fn transmute_into(self) -> $type {
                self
            }
        }
    };
}

impl_transmute_into_self!(i32);
impl_transmute_into_self!(i64);
impl_transmute_into_self!(f32);
impl_transmute_into_self!(f64);
impl_transmute_into_self!(F32);
impl_transmute_into_self!(F64);

macro_rules! impl_transmute_into_as {
    ($from:ident, $into:ident) => {
        impl TransmuteInto<$into> for $from {
            fn transmute_into(self) -> $into {
                self as $into
            }
        }
    };
}

impl_transmute_into_as!(i8, u8);
impl_transmute_into_as!(u8, i8);
impl_transmute_into_as!(i16, u16);
impl_transmute_into_as!(u16, i16);
impl_transmute_into_as!(i32, u32);
impl_transmute_into_as!(u32, i32);
impl_transmute_into_as!(i64, u64);
impl_transmute_into_as!(u64, i64);

impl TransmuteInto<i32> for F32 {
    fn transmute_into(self) -> i32 {
        self.to_bits() as i32
    }
}

impl TransmuteInto<i64> for F64 {
    fn transmute_into(self) -> i64 {
        self.to_bits() as i64
    }
}

impl TransmuteInto<F32> for i32 {
    fn transmute_into(self) -> F32 {
        F32::from_bits(self as u32)
    }
}

impl TransmuteInto<F64> for i64 {
    fn transmute_into(self) -> F64 {
        F64::from_bits(self as u64)
    }
}

impl TransmuteInto<u32> for F32 {
    fn transmute_into(self) -> u32 {
        self.to_bits()
    }
}

impl TransmuteInto<u64> for F64 {
    fn transmute_into(self) -> u64 {
        self.to_bits()
    }
}

macro_rules! impl_little_endian_convert_primitive {
    ( $($primitive:ty),* ) => {
        $(
            impl LittleEndianConvert for $primitive {
                type Bytes = [u8; ::core::mem::size_of::<$primitive>()];

                fn into_le_bytes(self) -> Self::Bytes {
                    <$primitive>::to_le_bytes(self)
                }

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$primitive>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_little_endian_convert_primitive!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

macro_rules! impl_little_endian_convert_float {
    ( $( struct $float_ty:ident($uint_ty:ty); )* ) => {
        $(
            impl LittleEndianConvert for $float_ty {
                type Bytes = <$uint_ty as LittleEndianConvert>::Bytes;

                fn into_le_bytes(self) -> Self::Bytes {
                    self.to_bits().into_le_bytes()
                }

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    Self::from_bits(<$uint_ty>::from_le_bytes(bytes))
                }
            }
        )*
    };
}

impl_little_endian_convert_float!(
    struct F32(u32);
    struct F64(u64);
);

macro_rules! impl_integer_arithmetic_ops {
    ($type:ident) => {
        impl ArithmeticOps<$type> for $type {
            fn add(self, other: $type) -> $type {
                self.wrapping_add(other)
            }
            fn sub(self, other: $type) -> $type {
                self.wrapping_sub(other)
            }
            fn mul(self, other: $type) -> $type {
                self.wrapping_mul(other)
            }
            fn div(self, other: $type) -> Result<$type, ErrorKind> {
                if other == 0 {
                    return Err(ErrorKind::IntegerDivByZero);
                }
                let (result, overflow) = self.overflowing_div(other);
                if overflow {
                    return Err(ErrorKind::IntegerOverflow);
                }
                Ok(result)
            }
        }
    };
}

impl_integer_arithmetic_ops!(i32);
impl_integer_arithmetic_ops!(u32);
impl_integer_arithmetic_ops!(i64);
impl_integer_arithmetic_ops!(u64);

macro_rules! impl_float_arithmetic_ops {
    ($type:ident) => {
        impl ArithmeticOps<$type> for $type {
            fn add(self, other: $type) -> $type {
                self + other
            }
            fn sub(self, other: $type) -> $type {
                self - other
            }
            fn mul(self, other: $type) -> $type {
                self * other
            }
            fn div(self, other: $type) -> Result<$type, ErrorKind> {
                Ok(self / other)
            }
        }
    };
}

impl_float_arithmetic_ops!(F32);
impl_float_arithmetic_ops!(F64);

macro_rules! impl_integer {
    ($type:ident) => {
        impl Integer<$type> for $type {
            fn leading_zeros(self) -> $type {
                self.leading_zeros() as $type
            }
            fn trailing_zeros(self) -> $type {
                self.trailing_zeros() as $type
            }
            fn count_ones(self) -> $type {
                self.count_ones() as $type
            }
            fn rotl(self, other: $type) -> $type {
                self.rotate_left(other as u32)
            }
            fn rotr(self, other: $type) -> $type {
                self.rotate_right(other as u32)
            }
            fn rem(self, other: $type) -> Result<$type, ErrorKind> {
                if other == 0 {
                    return Err(ErrorKind::IntegerDivByZero);
                }
                // MIN % -1 is 0 and must not trap.
                Ok(self.wrapping_rem(other))
            }
        }
    };
}

impl_integer!(i32);
impl_integer!(u32);
impl_integer!(i64);
impl_integer!(u64);

macro_rules! impl_float {
    ($type:ident) => {
        impl Float<$type> for $type {
            fn abs(self) -> $type {
                $type::abs(self)
            }
            fn floor(self) -> $type {
                $type::floor(self)
            }
            fn ceil(self) -> $type {
                $type::ceil(self)
            }
            fn trunc(self) -> $type {
                $type::trunc(self)
            }
            fn nearest(self) -> $type {
                $type::nearest(self)
            }
            fn sqrt(self) -> $type {
                $type::sqrt(self)
            }
            fn min(self, other: $type) -> $type {
                $type::min(self, other)
            }
            fn max(self, other: $type) -> $type {
                $type::max(self, other)
            }
            fn copysign(self, other: $type) -> $type {
                $type::copysign(self, other)
            }
        }
    };
}

impl_float!(F32);
impl_float!(F64);

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn signed_division_overflow_traps() {
        assert_matches!(
            ArithmeticOps::div(i32::MIN, -1),
            Err(ErrorKind::IntegerOverflow)
        );
        assert_matches!(
            ArithmeticOps::div(i64::MIN, -1),
            Err(ErrorKind::IntegerOverflow)
        );
    }

    #[test]
    fn division_by_zero_traps() {
        assert_matches!(ArithmeticOps::div(10i32, 0), Err(ErrorKind::IntegerDivByZero));
        assert_matches!(Integer::rem(10u64, 0), Err(ErrorKind::IntegerDivByZero));
    }

    #[test]
    fn signed_remainder_overflow_is_zero() {
        assert_eq!(Integer::rem(i32::MIN, -1), Ok(0));
        assert_eq!(Integer::rem(i64::MIN, -1), Ok(0));
    }

    #[test]
    fn truncation_rejects_nan() {
        let nan: f32 = f32::NAN;
        assert_matches!(
            TryTruncateInto::<i32, _>::try_truncate_into(nan),
            Err(ErrorKind::InvalidConversionToInteger)
        );
    }

    #[test]
    fn truncation_bounds_are_exact() {
        // 2^31 overflows i32; the largest f64 below it converts fine.
        assert_matches!(
            TryTruncateInto::<i32, _>::try_truncate_into(2147483648.0f64),
            Err(ErrorKind::IntegerOverflow)
        );
        assert_eq!(
            TryTruncateInto::<i32, _>::try_truncate_into(2147483647.0f64),
            Ok(0x7fff_ffffi32)
        );
        assert_eq!(
            TryTruncateInto::<i32, _>::try_truncate_into(-2147483648.0f64),
            Ok(i32::MIN)
        );
        assert_matches!(
            TryTruncateInto::<i32, _>::try_truncate_into(-2147483649.0f64),
            Err(ErrorKind::IntegerOverflow)
        );
        // Unsigned range: (-1, 2^32).
        assert_eq!(
            TryTruncateInto::<u32, _>::try_truncate_into(-0.75f32),
            Ok(0u32)
        );
        assert_matches!(
            TryTruncateInto::<u32, _>::try_truncate_into(-1.0f32),
            Err(ErrorKind::IntegerOverflow)
        );
        assert_matches!(
            TryTruncateInto::<u32, _>::try_truncate_into(4294967296.0f64),
            Err(ErrorKind::IntegerOverflow)
        );
        assert_eq!(
            TryTruncateInto::<u32, _>::try_truncate_into(4294967295.0f64),
            Ok(u32::MAX)
        );
    }

    #[test]
    fn rotations_mask_the_shift_amount() {
        assert_eq!(Integer::rotl(1u32, 33), 2);
        assert_eq!(Integer::rotr(2u64, 65), 1);
    }

    #[test]
    fn value_round_trips_through_bits() {
        for value in [
            Value::I32(-5),
            Value::I64(i64::MIN),
            Value::decode_f32(0x7fc0_0001),
            Value::decode_f64(0x7ff8_0000_0000_0002),
        ] {
            let ty = value.value_type();
            assert_eq!(Value::from_bits(ty, value.to_bits()).to_bits(), value.to_bits());
        }
    }
}
