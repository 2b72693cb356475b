//! MP4 `ilst` atoms of video files. The id and thumbnail reference live in
//! iTunes-style freeform atoms.

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

use lofty::config::{ParseOptions, WriteOptions};
use lofty::error::LoftyError;
use lofty::mp4::{Atom, AtomData, AtomIdent, Ilst, Mp4File};
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::{Accessor, AudioFile, TagExt};

use super::{ID_KEY, TagPatch, THUMBNAIL_KEY, non_empty, text_to_store};
use crate::sync::item::LocalDescriptor;

const FREEFORM_MEAN: &str = "com.apple.iTunes";
const ALBUM_ARTIST: AtomIdent<'static> = AtomIdent::Fourcc(*b"aART");
const COVER: AtomIdent<'static> = AtomIdent::Fourcc(*b"covr");

fn freeform(name: &'static str) -> AtomIdent<'static> {
    AtomIdent::Freeform {
        mean: Cow::Borrowed(FREEFORM_MEAN),
        name: Cow::Borrowed(name),
    }
}

fn read_ilst(path: &Path) -> Result<Option<Ilst>, LoftyError> {
    let mut file = File::open(path)?;
    let mp4 = Mp4File::read_from(&mut file, ParseOptions::new().read_properties(false))?;
    Ok(mp4.ilst().cloned())
}

pub(super) fn read(path: &Path) -> Result<LocalDescriptor, LoftyError> {
    let Some(ilst) = read_ilst(path)? else {
        return Ok(LocalDescriptor {
            path: path.to_path_buf(),
            ..LocalDescriptor::default()
        });
    };

    Ok(LocalDescriptor {
        path: path.to_path_buf(),
        id: text_atom(&ilst, &freeform(ID_KEY)),
        title: non_empty(ilst.title().map(Cow::into_owned)),
        channel: non_empty(ilst.artist().map(Cow::into_owned)),
        album: non_empty(ilst.album().map(Cow::into_owned)),
        album_artist: text_atom(&ilst, &ALBUM_ARTIST),
        track: ilst.track(),
        thumbnail: text_atom(&ilst, &freeform(THUMBNAIL_KEY)),
    })
}

fn text_atom(ilst: &Ilst, ident: &AtomIdent<'_>) -> Option<String> {
    let value = ilst.get(ident)?.data().find_map(|data| match data {
        AtomData::UTF8(value) => Some(value.clone()),
        _ => None,
    });
    non_empty(value)
}

fn set_text_atom(ilst: &mut Ilst, ident: AtomIdent<'static>, value: Option<&str>) {
    ilst.remove(&ident).for_each(drop);
    if let Some(value) = value {
        ilst.insert(Atom::new(ident, AtomData::UTF8(value.to_string())));
    }
}

pub(super) fn apply(path: &Path, patch: TagPatch) -> Result<(), LoftyError> {
    let mut ilst = read_ilst(path)?.unwrap_or_default();

    if let Some(id) = &patch.id {
        set_text_atom(&mut ilst, freeform(ID_KEY), Some(id));
    }
    if let Some(album) = &patch.album {
        match text_to_store(album.as_deref()) {
            Some(album) => ilst.set_album(album.to_string()),
            None => ilst.remove_album(),
        }
    }
    if let Some(title) = &patch.title {
        match text_to_store(title.as_deref()) {
            Some(title) => ilst.set_title(title.to_string()),
            None => ilst.remove_title(),
        }
    }
    if let Some(artist) = &patch.artist {
        match text_to_store(artist.as_deref()) {
            Some(artist) => ilst.set_artist(artist.to_string()),
            None => ilst.remove_artist(),
        }
    }
    if let Some(album_artist) = &patch.album_artist {
        set_text_atom(&mut ilst, ALBUM_ARTIST, text_to_store(album_artist.as_deref()));
    }
    if let Some(track) = patch.track {
        ilst.set_track(track);
    }
    if let Some(artwork) = patch.artwork {
        ilst.remove(&COVER).for_each(drop);
        ilst.insert_picture(
            Picture::unchecked(artwork.png)
                .pic_type(PictureType::CoverFront)
                .mime_type(MimeType::Png)
                .build(),
        );
        set_text_atom(&mut ilst, freeform(THUMBNAIL_KEY), Some(&artwork.url));
    }

    ilst.save_to_path(path, WriteOptions::default())
}

#[cfg(test)]
pub(crate) mod test_support {
    fn atom(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let size = u32::try_from(body.len() + 8).unwrap();
        let mut out = size.to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out
    }

    /// Smallest file the MP4 reader accepts: `ftyp`, a `moov` holding only
    /// `mvhd`, and an empty `mdat`.
    pub(crate) fn minimal_mp4() -> Vec<u8> {
        let mut ftyp = b"isom".to_vec();
        ftyp.extend_from_slice(&0x200u32.to_be_bytes());
        ftyp.extend_from_slice(b"isomiso2mp41");

        let mut mvhd = vec![0u8; 12];
        mvhd.extend_from_slice(&1000u32.to_be_bytes());
        mvhd.extend_from_slice(&0u32.to_be_bytes());
        mvhd.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        mvhd.extend_from_slice(&0x0100u16.to_be_bytes());
        mvhd.extend_from_slice(&[0u8; 10]);
        for value in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
            mvhd.extend_from_slice(&value.to_be_bytes());
        }
        mvhd.extend_from_slice(&[0u8; 24]);
        mvhd.extend_from_slice(&1u32.to_be_bytes());

        let mut file = atom(b"ftyp", &ftyp);
        file.extend(atom(b"moov", &atom(b"mvhd", &mvhd)));
        file.extend(atom(b"mdat", &[]));
        file
    }
}
