use crate::messaging::types::{MediaDescriptor, MediaKind, QuotedPayload};

/// Where the media sat inside the quoted envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Direct,
    Ephemeral,
    ViewOnce,
    EphemeralViewOnce,
}

/// A capturable media item found in a quoted message.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaReference {
    pub kind: MediaKind,
    pub descriptor: MediaDescriptor,
    pub shape: Shape,
}

/// Classify the quoted payload. Only images and videos are capturable, either directly or
/// one wrapper deep (an ephemeral wrapper may itself hold a view-once wrapper).
pub fn locate(payload: &QuotedPayload) -> Option<MediaReference> {
    let (kind, descriptor, shape) = match payload {
        QuotedPayload::Image(_) | QuotedPayload::Video(_) => {
            let (kind, d) = direct_media(payload)?;
            (kind, d, Shape::Direct)
        }
        QuotedPayload::Ephemeral(inner) => match inner.as_ref() {
            QuotedPayload::ViewOnce(media) => {
                let (kind, d) = direct_media(media)?;
                (kind, d, Shape::EphemeralViewOnce)
            }
            other => {
                let (kind, d) = direct_media(other)?;
                (kind, d, Shape::Ephemeral)
            }
        },
        QuotedPayload::ViewOnce(inner) => {
            let (kind, d) = direct_media(inner)?;
            (kind, d, Shape::ViewOnce)
        }
        QuotedPayload::Other(_) => return None,
    };

    Some(MediaReference {
        kind,
        descriptor: descriptor.clone(),
        shape,
    })
}

fn direct_media(payload: &QuotedPayload) -> Option<(MediaKind, &MediaDescriptor)> {
    match payload {
        QuotedPayload::Image(d) => Some((MediaKind::Image, d)),
        QuotedPayload::Video(d) => Some((MediaKind::Video, d)),
        QuotedPayload::Ephemeral(_) | QuotedPayload::ViewOnce(_) | QuotedPayload::Other(_) => None,
    }
}
