use std::sync::Arc;

pub trait ArcExt<T: ?Sized> {
    #[must_use]
    fn clone_arc(&self) -> Self
    where
        Self: Clone,
    {
        Self::clone(self)
    }

    #[must_use]
    fn make_mut(&mut self) -> &mut T
    where
        T: Clone;
}

impl<T: ?Sized> ArcExt<T> for Arc<T> {
    fn make_mut(&mut self) -> &mut T
    where
        T: Clone,
    {
        Self::make_mut(self)
    }
}
