use crate::{element::Element, rect::Rect, XYXY};

impl<T> TryFrom<[T; 4]> for XYXY<T>
where
    T: Element,
{
    type Error = anyhow::Error;

    fn try_from(from: [T; 4]) -> Result<Self, Self::Error> {
        Self::try_from_xyxy(from)
    }
}
