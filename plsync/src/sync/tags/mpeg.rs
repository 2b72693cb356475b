//! ID3v2.3 frames of audio files.

use std::path::Path;

use id3::frame::{ExtendedText, Picture, PictureType};
use id3::{ErrorKind, Tag, TagLike, Version};

use super::{ID_KEY, TagPatch, THUMBNAIL_KEY, non_empty, text_to_store};
use crate::sync::item::LocalDescriptor;

const ARTWORK_MIME: &str = "image/png";

pub(super) fn read(path: &Path) -> Result<LocalDescriptor, id3::Error> {
    let tag = match Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(err) if matches!(err.kind, ErrorKind::NoTag) => {
            return Ok(LocalDescriptor {
                path: path.to_path_buf(),
                ..LocalDescriptor::default()
            });
        }
        Err(err) => return Err(err),
    };

    Ok(LocalDescriptor {
        path: path.to_path_buf(),
        id: custom_text(&tag, ID_KEY),
        title: text_frame(tag.title()),
        channel: text_frame(tag.artist()),
        album: text_frame(tag.album()),
        album_artist: text_frame(tag.album_artist()),
        track: tag.track(),
        thumbnail: custom_text(&tag, THUMBNAIL_KEY),
    })
}

/// ID3v2.3 readers hand `/` back as the multi-value separator `\0`; undo it
/// so a value reads back as it was written.
fn text_frame(value: Option<&str>) -> Option<String> {
    non_empty(value.map(|value| value.replace('\0', "/")))
}

/// `TXXX:<key>` first; older files carry the value in the description of
/// a comment whose text is the key.
fn custom_text(tag: &Tag, key: &str) -> Option<String> {
    let value = tag
        .extended_texts()
        .find(|frame| frame.description == key)
        .map(|frame| frame.value.clone())
        .or_else(|| {
            tag.comments()
                .find(|comment| comment.text == key)
                .map(|comment| comment.description.clone())
        });
    non_empty(value)
}

fn set_text(
    tag: &mut Tag,
    value: &Option<String>,
    set: fn(&mut Tag, String),
    remove: fn(&mut Tag),
) {
    match text_to_store(value.as_deref()) {
        Some(value) => set(tag, value.to_string()),
        None => remove(tag),
    }
}

fn set_custom_text(tag: &mut Tag, key: &str, value: &str) {
    tag.remove_extended_text(Some(key), None);
    tag.remove_comment(None, Some(key));
    tag.add_frame(ExtendedText {
        description: key.to_string(),
        value: value.to_string(),
    });
}

pub(super) fn apply(path: &Path, patch: TagPatch) -> Result<(), id3::Error> {
    let mut tag = match Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(err) if matches!(err.kind, ErrorKind::NoTag) => Tag::new(),
        Err(err) => return Err(err),
    };

    if let Some(id) = &patch.id {
        set_custom_text(&mut tag, ID_KEY, id);
    }
    if let Some(album) = &patch.album {
        set_text(&mut tag, album, |t, v| t.set_album(v), |t| t.remove_album());
    }
    if let Some(title) = &patch.title {
        set_text(&mut tag, title, |t, v| t.set_title(v), |t| t.remove_title());
    }
    if let Some(artist) = &patch.artist {
        set_text(&mut tag, artist, |t, v| t.set_artist(v), |t| t.remove_artist());
    }
    if let Some(album_artist) = &patch.album_artist {
        set_text(
            &mut tag,
            album_artist,
            |t, v| t.set_album_artist(v),
            |t| t.remove_album_artist(),
        );
    }
    if let Some(track) = patch.track {
        tag.set_track(track);
    }
    if let Some(artwork) = patch.artwork {
        tag.remove_picture_by_type(PictureType::CoverFront);
        tag.add_frame(Picture {
            mime_type: ARTWORK_MIME.to_string(),
            picture_type: PictureType::CoverFront,
            description: String::new(),
            data: artwork.png,
        });
        set_custom_text(&mut tag, THUMBNAIL_KEY, &artwork.url);
    }

    tag.write_to_path(path, Version::Id3v23)
}
