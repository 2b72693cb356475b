use std::fmt;
use std::path::{Path, PathBuf};

use plsync_core::RemoteEntry;
use thiserror::Error;

pub const VARIOUS_ARTISTS: &str = "Various Artists";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MediaKind {
    #[default]
    Audio,
    Video,
}

impl MediaKind {
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Audio => "mp3",
            MediaKind::Video => "mp4",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("mp3") {
            Some(MediaKind::Audio)
        } else if ext.eq_ignore_ascii_case("mp4") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// Tag-backed fields whose changes are tracked individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Channel,
    Thumbnail,
    Index,
    AlbumArtist,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Title,
        Field::Channel,
        Field::Thumbnail,
        Field::Index,
        Field::AlbumArtist,
    ];

    fn bit(self) -> u8 {
        match self {
            Field::Title => 1 << 0,
            Field::Channel => 1 << 1,
            Field::Thumbnail => 1 << 2,
            Field::Index => 1 << 3,
            Field::AlbumArtist => 1 << 4,
        }
    }
}

/// Set of fields that must be rewritten into the file's tag.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet(u8);

impl ChangeSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Field::ALL.into_iter().collect()
    }

    pub fn insert(&mut self, field: Field) {
        self.0 |= field.bit();
    }

    pub fn remove(&mut self, field: Field) {
        self.0 &= !field.bit();
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Field> + '_ {
        Field::ALL
            .into_iter()
            .filter(move |field| self.contains(*field))
    }
}

impl FromIterator<Field> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        let mut set = ChangeSet::empty();
        for field in iter {
            set.insert(field);
        }
        set
    }
}

impl fmt::Debug for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("entry has no id")]
    MissingId,
    #[error("entry id {0:?} cannot be used as an identifier")]
    InvalidId(String),
    #[error("entry {0} has no title")]
    MissingTitle(String),
    #[error("entry {0} has no thumbnail")]
    MissingThumbnail(String),
}

/// Collection-wide values stamped onto every remote item.
#[derive(Debug, Clone, Default)]
pub struct CollectionInfo {
    pub name: Option<String>,
    pub artist: Option<String>,
    pub media_kind: MediaKind,
}

/// Fields recovered from a file already on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalDescriptor {
    pub path: PathBuf,
    pub id: Option<String>,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    /// 1-based track number as stored in the tag.
    pub track: Option<u32>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    id: String,
    title: Option<String>,
    channel: Option<String>,
    thumbnail: Option<String>,
    index: Option<usize>,
    stored_index: Option<usize>,
    local_path: Option<PathBuf>,
    album: Option<String>,
    album_artist: Option<String>,
    media_kind: MediaKind,
    changes: ChangeSet,
    fresh: bool,
}

impl Item {
    /// Builds an item from one playlist entry. Remote items have never been
    /// written, so every field starts out dirty.
    pub fn from_remote(
        entry: &RemoteEntry,
        position: usize,
        collection: &CollectionInfo,
    ) -> Result<Self, ItemError> {
        let id = validate_id(entry.id.as_deref())?;
        let title = entry
            .title
            .clone()
            .ok_or_else(|| ItemError::MissingTitle(id.clone()))?;
        let thumbnail = entry
            .best_thumbnail()
            .map(str::to_owned)
            .ok_or_else(|| ItemError::MissingThumbnail(id.clone()))?;

        Ok(Self {
            id,
            title: non_empty(Some(title)),
            channel: non_empty(entry.artist().map(str::to_owned)),
            thumbnail: Some(thumbnail),
            index: Some(position),
            stored_index: None,
            local_path: None,
            album: non_empty(collection.name.clone()),
            album_artist: non_empty(collection.artist.clone()),
            media_kind: collection.media_kind,
            changes: ChangeSet::all(),
            fresh: false,
        })
    }

    pub fn from_local(descriptor: LocalDescriptor) -> Result<Self, ItemError> {
        let id = validate_id(descriptor.id.as_deref())?;
        let index = descriptor
            .track
            .and_then(|track| track.checked_sub(1))
            .map(|index| index as usize);
        let media_kind = MediaKind::from_path(&descriptor.path).unwrap_or_default();
        Ok(Self {
            id,
            title: non_empty(descriptor.title),
            channel: non_empty(descriptor.channel),
            thumbnail: non_empty(descriptor.thumbnail),
            index,
            stored_index: index,
            local_path: Some(descriptor.path),
            album: non_empty(descriptor.album),
            album_artist: non_empty(descriptor.album_artist),
            media_kind,
            changes: ChangeSet::empty(),
            fresh: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    pub fn album(&self) -> Option<&str> {
        self.album.as_deref()
    }

    pub fn album_artist(&self) -> Option<&str> {
        self.album_artist.as_deref()
    }

    pub fn media_kind(&self) -> MediaKind {
        self.media_kind
    }

    pub fn changes(&self) -> ChangeSet {
        self.changes
    }

    /// True once the file was produced during this run and has no tag yet.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn needs_write(&self) -> bool {
        self.fresh || !self.changes.is_empty()
    }

    pub fn set_title(&mut self, title: Option<String>) {
        assign(&mut self.title, non_empty(title), &mut self.changes, Field::Title);
    }

    pub fn set_channel(&mut self, channel: Option<String>) {
        assign(&mut self.channel, non_empty(channel), &mut self.changes, Field::Channel);
    }

    pub fn set_thumbnail(&mut self, thumbnail: Option<String>) {
        assign(
            &mut self.thumbnail,
            non_empty(thumbnail),
            &mut self.changes,
            Field::Thumbnail,
        );
    }

    pub fn set_album_artist(&mut self, artist: Option<String>) {
        assign(
            &mut self.album_artist,
            non_empty(artist),
            &mut self.changes,
            Field::AlbumArtist,
        );
    }

    pub fn set_index(&mut self, index: usize) {
        assign(&mut self.index, Some(index), &mut self.changes, Field::Index);
    }

    /// Merges a newer descriptor of the same item. Only fields whose value
    /// differs are replaced and flagged; existing flags are kept.
    pub fn update(&mut self, incoming: &Item) {
        debug_assert_eq!(self.id, incoming.id);
        self.set_title(incoming.title.clone());
        self.set_channel(incoming.channel.clone());
        self.set_thumbnail(incoming.thumbnail.clone());
        if let Some(index) = incoming.index {
            self.set_index(index);
        }
        self.set_album_artist(incoming.album_artist.clone());
    }

    /// Final position after reindexing. The index flag ends up describing
    /// whether the tag on disk holds a different position.
    pub(crate) fn assign_position(&mut self, position: usize) {
        self.set_index(position);
        if self.stored_index == Some(position) {
            self.changes.remove(Field::Index);
        }
    }

    pub fn mark_materialized(&mut self, path: PathBuf) {
        self.local_path = Some(path);
        self.fresh = true;
        self.changes = ChangeSet::all();
    }

    /// Called after a successful write-back.
    pub fn clear_changes(&mut self) {
        self.changes = ChangeSet::empty();
        self.fresh = false;
        self.stored_index = self.index;
    }
}

fn assign<T: PartialEq>(slot: &mut T, value: T, changes: &mut ChangeSet, field: Field) {
    if *slot != value {
        *slot = value;
        changes.insert(field);
    }
}

/// Tags cannot hold an empty text frame, so an empty value is stored as
/// absent on both sides of a comparison. Other text is kept verbatim.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

fn validate_id(raw: Option<&str>) -> Result<String, ItemError> {
    let id = raw.ok_or(ItemError::MissingId)?;
    if id.is_empty() {
        return Err(ItemError::MissingId);
    }
    // Ids become staging file names.
    let unusable = id == "."
        || id == ".."
        || id
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control());
    if unusable {
        return Err(ItemError::InvalidId(id.to_string()));
    }
    Ok(id.to_string())
}

/// Collapses the artists seen across a collection into one album artist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AlbumArtist {
    #[default]
    Unknown,
    Single(String),
    Various,
}

impl AlbumArtist {
    pub fn observe(&mut self, artist: Option<&str>) {
        let Some(artist) = artist.map(str::trim).filter(|a| !a.is_empty()) else {
            return;
        };
        match self {
            AlbumArtist::Unknown => *self = AlbumArtist::Single(artist.to_string()),
            AlbumArtist::Single(current) if current.as_str() != artist => *self = AlbumArtist::Various,
            AlbumArtist::Single(_) | AlbumArtist::Various => {}
        }
    }

    pub fn resolve(&self) -> Option<String> {
        match self {
            AlbumArtist::Unknown => None,
            AlbumArtist::Single(artist) => Some(artist.clone()),
            AlbumArtist::Various => Some(VARIOUS_ARTISTS.to_string()),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn remote_entry(id: &str, title: &str, channel: &str) -> RemoteEntry {
        RemoteEntry {
            id: Some(id.to_string()),
            title: Some(title.to_string()),
            channel: Some(channel.to_string()),
            uploader: None,
            thumbnails: Some(vec![plsync_core::Thumbnail {
                url: Some(format!("https://i.example/{id}.jpg")),
                height: Some(100),
            }]),
            thumbnail: None,
        }
    }

    pub fn remote_item(id: &str, title: &str, channel: &str, position: usize) -> Item {
        let info = CollectionInfo {
            name: Some("Mix".to_string()),
            artist: Some(channel.to_string()),
            media_kind: MediaKind::Audio,
        };
        Item::from_remote(&remote_entry(id, title, channel), position, &info).unwrap()
    }

    /// A file on disk that already carries exactly what `remote_item` would write.
    pub fn local_item(id: &str, title: &str, channel: &str, index: usize) -> Item {
        Item::from_local(LocalDescriptor {
            path: PathBuf::from(format!("/music/{title}.mp3")),
            id: Some(id.to_string()),
            title: Some(title.to_string()),
            channel: Some(channel.to_string()),
            album: Some("Mix".to_string()),
            album_artist: Some(channel.to_string()),
            track: Some(index as u32 + 1),
            thumbnail: Some(format!("https://i.example/{id}.jpg")),
        })
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn remote_item_starts_fully_dirty() {
        let item = remote_item("x1", "Song", "Band", 0);
        assert_eq!(item.changes(), ChangeSet::all());
        assert_eq!(item.thumbnail(), Some("https://i.example/x1.jpg"));
        assert!(item.local_path().is_none());
    }

    #[test]
    fn local_item_starts_clean() {
        let item = local_item("x1", "Song", "Band", 3);
        assert!(item.changes().is_empty());
        assert_eq!(item.index(), Some(3));
        assert!(!item.needs_write());
    }

    #[test]
    fn remote_entry_without_thumbnail_is_rejected() {
        let mut entry = remote_entry("x1", "Song", "Band");
        entry.thumbnails = None;
        let err = Item::from_remote(&entry, 0, &CollectionInfo::default()).unwrap_err();
        assert_eq!(err, ItemError::MissingThumbnail("x1".to_string()));
    }

    #[test]
    fn remote_entry_without_id_is_rejected() {
        let mut entry = remote_entry("x1", "Song", "Band");
        entry.id = None;
        assert_eq!(
            Item::from_remote(&entry, 0, &CollectionInfo::default()).unwrap_err(),
            ItemError::MissingId
        );
        entry.id = Some(String::new());
        assert_eq!(
            Item::from_remote(&entry, 0, &CollectionInfo::default()).unwrap_err(),
            ItemError::MissingId
        );
    }

    #[test]
    fn path_like_ids_are_rejected() {
        for bad in ["..", "a/b", "a\\b", "a\nb"] {
            let entry = remote_entry(bad, "Song", "Band");
            assert!(matches!(
                Item::from_remote(&entry, 0, &CollectionInfo::default()),
                Err(ItemError::InvalidId(_))
            ));
        }
    }

    #[test]
    fn empty_remote_text_is_absent_and_whitespace_is_kept() {
        let entry = remote_entry("x1", "Song ", "");
        let info = CollectionInfo {
            name: Some(String::new()),
            artist: None,
            media_kind: MediaKind::Audio,
        };
        let item = Item::from_remote(&entry, 0, &info).unwrap();
        assert_eq!(item.title(), Some("Song "));
        assert_eq!(item.channel(), None);
        assert_eq!(item.album(), None);

        let mut local = Item::from_local(LocalDescriptor {
            path: PathBuf::from("/music/Song.mp3"),
            id: Some("x1".to_string()),
            title: Some("Song ".to_string()),
            channel: Some(String::new()),
            track: Some(1),
            thumbnail: Some("https://i.example/x1.jpg".to_string()),
            ..LocalDescriptor::default()
        })
        .unwrap();
        local.update(&item);
        assert!(local.changes().is_empty(), "{:?}", local.changes());
    }

    #[test]
    fn local_file_without_id_is_rejected() {
        let err = Item::from_local(LocalDescriptor {
            path: PathBuf::from("/music/a.mp3"),
            ..LocalDescriptor::default()
        })
        .unwrap_err();
        assert_eq!(err, ItemError::MissingId);
    }

    #[test]
    fn track_number_maps_to_zero_based_index() {
        let item = local_item("x1", "Song", "Band", 0);
        assert_eq!(item.index(), Some(0));

        let untracked = Item::from_local(LocalDescriptor {
            path: PathBuf::from("/music/a.mp3"),
            id: Some("x2".to_string()),
            track: Some(0),
            ..LocalDescriptor::default()
        })
        .unwrap();
        assert_eq!(untracked.index(), None);
    }

    #[test]
    fn update_flags_only_changed_fields() {
        let mut item = local_item("x1", "Old Title", "Band", 0);
        item.update(&remote_item("x1", "New Title", "Band", 0));
        assert_eq!(item.title(), Some("New Title"));
        assert_eq!(item.changes().iter().collect::<Vec<_>>(), vec![Field::Title]);
    }

    #[test]
    fn update_never_clears_existing_flags() {
        let mut item = local_item("x1", "Song", "Band", 0);
        item.set_channel(Some("Other".to_string()));
        item.update(&remote_item("x1", "Song", "Other", 0));
        assert!(item.changes().contains(Field::Channel));
    }

    #[test]
    fn set_index_touches_only_index_flag() {
        let mut item = local_item("x1", "Song", "Band", 0);
        item.set_index(0);
        assert!(item.changes().is_empty());
        item.set_index(4);
        assert_eq!(item.changes().iter().collect::<Vec<_>>(), vec![Field::Index]);
    }

    #[test]
    fn materializing_forces_full_write() {
        let mut item = remote_item("x1", "Song", "Band", 0);
        item.mark_materialized(PathBuf::from("/music/Song.mp3"));
        assert!(item.is_fresh());
        assert_eq!(item.changes(), ChangeSet::all());
        item.clear_changes();
        assert!(!item.needs_write());
    }

    #[test]
    fn album_artist_collapses_to_various() {
        let mut artist = AlbumArtist::default();
        for channel in ["A", "A", "B"] {
            artist.observe(Some(channel));
        }
        assert_eq!(artist.resolve().as_deref(), Some(VARIOUS_ARTISTS));
    }

    #[test]
    fn album_artist_keeps_single_artist() {
        let mut artist = AlbumArtist::default();
        artist.observe(Some("A"));
        artist.observe(None);
        artist.observe(Some("A"));
        assert_eq!(artist.resolve().as_deref(), Some("A"));
    }

    #[test]
    fn album_artist_is_order_independent() {
        let orders = [["A", "B", "A"], ["B", "A", "A"], ["A", "A", "B"]];
        for order in orders {
            let mut artist = AlbumArtist::default();
            for channel in order {
                artist.observe(Some(channel));
            }
            assert_eq!(artist, AlbumArtist::Various);
        }
    }

    #[test]
    fn change_set_debug_lists_fields() {
        let set: ChangeSet = [Field::Title, Field::Index].into_iter().collect();
        assert_eq!(format!("{set:?}"), "{Title, Index}");
        assert_eq!(set.len(), 2);
    }
}
