//! Remote path identity and directory listings
//!
//! A [`Path`] is a value: its parent is derived from the absolute name on
//! demand, so listings own their entries and nothing points back up the tree.

use std::hash::{Hash, Hasher};

use crate::attributes::PathAttributes;

/// Type tag of a remote resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathType {
    File,
    Directory,
    Symlink,
}

impl std::fmt::Display for PathType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathType::File => write!(f, "file"),
            PathType::Directory => write!(f, "directory"),
            PathType::Symlink => write!(f, "symlink"),
        }
    }
}

/// Cache identity of a path: its normalized absolute name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathReference(String);

impl PathReference {
    pub fn new(absolute: &str) -> Self {
        Self(normalize(absolute))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PathReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize an absolute remote path
///
/// Collapses repeated separators, resolves `.` and `..`, strips the
/// trailing separator and always yields a leading `/`.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Logical identifier for a remote resource
#[derive(Debug, Clone)]
pub struct Path {
    absolute: String,
    kind: PathType,
    attributes: PathAttributes,
}

impl Path {
    pub fn new(absolute: impl AsRef<str>, kind: PathType) -> Self {
        Self {
            absolute: normalize(absolute.as_ref()),
            kind,
            attributes: PathAttributes::default(),
        }
    }

    pub fn file(absolute: impl AsRef<str>) -> Self {
        Self::new(absolute, PathType::File)
    }

    pub fn directory(absolute: impl AsRef<str>) -> Self {
        Self::new(absolute, PathType::Directory)
    }

    pub fn root() -> Self {
        Self::directory("/")
    }

    /// Child of this path, `name` may contain separators
    pub fn child(&self, name: &str, kind: PathType) -> Path {
        Path::new(format!("{}/{}", self.absolute, name), kind)
    }

    pub fn with_attributes(mut self, attributes: PathAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn absolute(&self) -> &str {
        &self.absolute
    }

    /// Last segment, empty for the root
    pub fn name(&self) -> &str {
        self.absolute.rsplit('/').next().unwrap_or_default()
    }

    pub fn kind(&self) -> PathType {
        self.kind
    }

    pub fn is_root(&self) -> bool {
        self.absolute == "/"
    }

    pub fn is_file(&self) -> bool {
        self.kind == PathType::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == PathType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == PathType::Symlink
    }

    /// Parent directory, `None` for the root
    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        let parent = match self.absolute.rfind('/') {
            Some(0) | None => "/",
            Some(i) => &self.absolute[..i],
        };
        Some(Path::directory(parent))
    }

    pub fn reference(&self) -> PathReference {
        PathReference(self.absolute.clone())
    }

    pub fn attributes(&self) -> &PathAttributes {
        &self.attributes
    }

    /// Store attributes returned by an attribute lookup
    pub fn set_attributes(&mut self, attributes: PathAttributes) {
        self.attributes = attributes;
    }

    /// Sibling path with the same type and a different name
    pub fn with_name(&self, name: &str) -> Path {
        match self.parent() {
            Some(parent) => parent.child(name, self.kind),
            None => self.clone(),
        }
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.absolute == other.absolute
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.absolute.hash(state);
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.absolute)
    }
}

/// Ordered directory listing
#[derive(Debug, Clone, Default)]
pub struct AttributedList {
    items: Vec<Path>,
}

impl AttributedList {
    pub fn new(items: Vec<Path>) -> Self {
        Self { items }
    }

    /// Listing of a directory known to have no children
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Path> {
        self.items.iter()
    }

    pub fn contains(&self, reference: &PathReference) -> bool {
        self.get(reference).is_some()
    }

    pub fn get(&self, reference: &PathReference) -> Option<&Path> {
        self.items
            .iter()
            .find(|p| p.absolute() == reference.as_str())
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Path> {
        self.items.iter().find(|p| p.name() == name)
    }

    pub fn push(&mut self, path: Path) {
        self.items.push(path);
    }

    pub fn into_vec(self) -> Vec<Path> {
        self.items
    }
}

impl FromIterator<Path> for AttributedList {
    fn from_iter<I: IntoIterator<Item = Path>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a AttributedList {
    type Item = &'a Path;
    type IntoIter = std::slice::Iter<'a, Path>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("home/user"), "/home/user");
        assert_eq!(normalize("/home//user/"), "/home/user");
        assert_eq!(normalize("/home/./user/../other"), "/home/other");
        assert_eq!(normalize("/.."), "/");
    }

    #[test]
    fn test_parent_and_name() {
        let p = Path::file("/home/user/test.txt");
        assert_eq!(p.name(), "test.txt");
        let parent = p.parent().unwrap();
        assert_eq!(parent.absolute(), "/home/user");
        assert!(parent.is_directory());

        let top = Path::directory("/home");
        assert_eq!(top.parent().unwrap().absolute(), "/");
        assert!(Path::root().parent().is_none());
        assert_eq!(Path::root().name(), "");
    }

    #[test]
    fn test_child() {
        let home = Path::directory("/home");
        let child = home.child("a/b.txt", PathType::File);
        assert_eq!(child.absolute(), "/home/a/b.txt");
        assert_eq!(Path::root().child("x", PathType::File).absolute(), "/x");
    }

    #[test]
    fn test_identity_ignores_attributes() {
        let mut a = Path::file("/data//file.bin");
        let b = Path::file("/data/file.bin");
        a.set_attributes(PathAttributes {
            size: Some(10),
            ..Default::default()
        });
        assert_eq!(a, b);
        assert_eq!(a.reference(), b.reference());

        let mut map = HashMap::new();
        map.insert(a, "first");
        assert_eq!(map.get(&b), Some(&"first"));
    }

    #[test]
    fn test_with_name() {
        let p = Path::file("/docs/report.pdf");
        assert_eq!(p.with_name("report-1.pdf").absolute(), "/docs/report-1.pdf");
    }

    #[test]
    fn test_attributed_list_lookup() {
        let list: AttributedList = vec![Path::file("/a/one"), Path::directory("/a/two")]
            .into_iter()
            .collect();
        assert_eq!(list.len(), 2);
        assert!(list.contains(&PathReference::new("/a/one")));
        assert!(!list.contains(&PathReference::new("/a/three")));
        assert!(list.find_by_name("two").unwrap().is_directory());
        assert!(AttributedList::empty().is_empty());
    }
}
