//! Local-disk implementation of [`RealFile`].

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::file::{RandomAccessStream, ReadStream, RealFile};

/// A file or directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn target_in(&self, dir: &dyn RealFile, new_name: Option<&str>) -> PathBuf {
        let name = new_name.map(str::to_owned).unwrap_or_else(|| self.name());
        PathBuf::from(dir.display_path()).join(name)
    }
}

impl RealFile for LocalFile {
    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn is_dir(&self) -> bool {
        self.path.is_dir()
    }

    fn len(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn display_path(&self) -> String {
        self.path.display().to_string()
    }

    fn delete(&self) -> Result<()> {
        if self.path.is_dir() {
            fs::remove_dir_all(&self.path)?;
        } else {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn resize(&self, len: u64) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.set_len(len)?;
        Ok(())
    }

    fn create_file(&self, name: &str) -> Result<Box<dyn RealFile>> {
        let path = self.path.join(name);
        File::create(&path)?;
        Ok(Box::new(Self::new(path)))
    }

    fn create_directory(&self, name: &str) -> Result<Box<dyn RealFile>> {
        let path = self.path.join(name);
        fs::create_dir_all(&path)?;
        Ok(Box::new(Self::new(path)))
    }

    fn list_files(&self) -> Result<Vec<Box<dyn RealFile>>> {
        let mut files: Vec<Box<dyn RealFile>> = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            files.push(Box::new(Self::new(entry?.path())));
        }
        files.sort_by_key(|f| f.name());
        Ok(files)
    }

    fn move_to(&self, dir: &dyn RealFile, new_name: Option<&str>) -> Result<Box<dyn RealFile>> {
        let target = self.target_in(dir, new_name);
        fs::rename(&self.path, &target)?;
        Ok(Box::new(Self::new(target)))
    }

    fn copy_to(&self, dir: &dyn RealFile, new_name: Option<&str>) -> Result<Box<dyn RealFile>> {
        let target = self.target_in(dir, new_name);
        fs::copy(&self.path, &target)?;
        Ok(Box::new(Self::new(target)))
    }

    fn child(&self, name: &str) -> Box<dyn RealFile> {
        Box::new(Self::new(self.path.join(name)))
    }

    fn parent(&self) -> Option<Box<dyn RealFile>> {
        self.path
            .parent()
            .map(|p| Box::new(Self::new(p.to_path_buf())) as Box<dyn RealFile>)
    }

    fn input_stream(&self) -> Result<Box<dyn ReadStream>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn output_stream(&self) -> Result<Box<dyn RandomAccessStream>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom, Write};

    use super::*;

    #[test]
    fn test_create_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let root = LocalFile::new(dir.path());

        let file = root.create_file("a.bin").unwrap();
        assert!(file.exists());
        assert_eq!(file.name(), "a.bin");
        assert_eq!(file.len().unwrap(), 0);

        let names: Vec<String> = root.list_files().unwrap().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["a.bin"]);

        file.delete().unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_independent_handles_disjoint_writes() {
        let dir = tempfile::tempdir().unwrap();
        let root = LocalFile::new(dir.path());
        let file = root.create_file("split.bin").unwrap();

        let mut a = file.output_stream().unwrap();
        let mut b = file.output_stream().unwrap();
        b.seek(SeekFrom::Start(4)).unwrap();
        b.write_all(b"world").unwrap();
        a.write_all(b"hell").unwrap();
        a.flush().unwrap();
        b.flush().unwrap();

        let mut contents = Vec::new();
        file.input_stream().unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"hellworld");
    }

    #[test]
    fn test_move_and_copy() {
        let dir = tempfile::tempdir().unwrap();
        let root = LocalFile::new(dir.path());
        let sub = root.create_directory("sub").unwrap();

        let file = root.create_file("x.bin").unwrap();
        let copied = file.copy_to(sub.as_ref(), Some("y.bin")).unwrap();
        assert!(copied.exists());
        assert!(file.exists());

        let moved = file.move_to(sub.as_ref(), None).unwrap();
        assert!(moved.exists());
        assert!(!file.exists());
    }
}
