//! Scalar element types readable through a handle

use super::HandleKind;
use core::ffi::c_void;

/// A plain scalar that can be copied in and out of native memory.
///
/// # Safety
///
/// Implementors must be valid for every bit pattern of their size, since
/// values are read straight from native memory.
pub unsafe trait Element: Copy + 'static {
    /// Handle kind whose elements have this type
    const KIND: HandleKind;
}

unsafe impl Element for i8 {
    const KIND: HandleKind = HandleKind::Byte;
}

unsafe impl Element for u8 {
    const KIND: HandleKind = HandleKind::Byte;
}

unsafe impl Element for i16 {
    const KIND: HandleKind = HandleKind::Short;
}

unsafe impl Element for u16 {
    const KIND: HandleKind = HandleKind::Char;
}

unsafe impl Element for i32 {
    const KIND: HandleKind = HandleKind::Int;
}

unsafe impl Element for i64 {
    const KIND: HandleKind = HandleKind::Long;
}

unsafe impl Element for f32 {
    const KIND: HandleKind = HandleKind::Float;
}

unsafe impl Element for f64 {
    const KIND: HandleKind = HandleKind::Double;
}

unsafe impl Element for usize {
    const KIND: HandleKind = HandleKind::SizeT;
}

unsafe impl Element for *mut c_void {
    const KIND: HandleKind = HandleKind::PointerPointer;
}
