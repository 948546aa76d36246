//! Capability queries for checked downcasts.

/// Declares that a value of the implementing type can report whether it may
/// be viewed as a `Target`.
///
/// This is the capability query behind [`Handle::downcast`]: instead of
/// open-ended runtime type identification, the element-type family answers
/// a tagged-union/variant question about the concrete value. The usual
/// implementation inspects a discriminant stored in a common prefix.
///
/// Implementations must be conservative: answering `true` asserts that the
/// pointed-at bytes really are a valid `Target`.
///
/// # Examples
///
/// ```
/// use tether::{Handle, Registry, ViewAs};
///
/// #[derive(Clone, Copy, PartialEq, Eq)]
/// enum Tag {
///     Circle,
///     Square,
/// }
///
/// #[repr(C)]
/// struct Shape {
///     tag: Tag,
/// }
///
/// #[repr(C)]
/// struct Circle {
///     shape: Shape,
///     radius: f64,
/// }
///
/// impl ViewAs<Circle> for Shape {
///     fn can_view_as(&self) -> bool {
///         self.tag == Tag::Circle
///     }
/// }
///
/// let registry = Registry::new();
/// let circle = Handle::new_in(
///     &registry,
///     Circle {
///         shape: Shape { tag: Tag::Circle },
///         radius: 2.0,
///     },
/// );
///
/// // View through the common prefix, then recover the concrete type.
/// let shape: Handle<Shape> = circle.cast();
/// let mut circle: Handle<Circle> = shape.downcast();
/// assert_eq!(circle.radius, 2.0);
/// circle.delete();
/// ```
///
/// [`Handle::downcast`]: crate::Handle::downcast
pub trait ViewAs<Target> {
    /// Whether this concrete value may be viewed as a `Target`.
    fn can_view_as(&self) -> bool;
}
