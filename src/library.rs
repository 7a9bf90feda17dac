//! Directory of saved macros.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::event::EventLog;
use crate::format::{self, Loaded};

/// A directory holding one file per macro, named after the macro.
#[derive(Clone, Debug)]
pub struct MacroLibrary {
    dir: PathBuf,
}

impl MacroLibrary {
    /// Open `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| Error::MacroDirectory {
            path: dir.clone(),
            source,
        })?;
        debug!(dir = %dir.display(), "macro library ready");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of every saved macro, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Path of the macro called `name`, whether or not it exists.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let bad = name.is_empty()
            || name == "."
            || name.contains("..")
            || name.contains(&['/', '\\'][..]);
        if bad {
            return Err(Error::InvalidMacroName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.path_for(name).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn load(&self, name: &str) -> Result<Loaded> {
        let path = self.path_for(name)?;
        match format::load_file(&path) {
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::MacroNotFound(name.to_string()))
            }
            other => other,
        }
    }

    /// Save `log` as `name`. Refuses to replace an existing macro unless `overwrite`.
    pub fn save(&self, name: &str, log: &EventLog, overwrite: bool) -> Result<PathBuf> {
        let path = self.path_for(name)?;
        if !overwrite && path.exists() {
            return Err(Error::MacroExists(name.to_string()));
        }
        format::save_file(&path, log)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{InputEvent, KeyAction};
    use crate::keycode::vc;

    fn tap() -> EventLog {
        EventLog::from_events([
            InputEvent::key(0, KeyAction::Pressed, vc::Q),
            InputEvent::key(30, KeyAction::Released, vc::Q),
        ])
        .unwrap()
    }

    #[test]
    fn open_creates_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = MacroLibrary::open(tmp.path().join("a/b/macros")).unwrap();
        assert!(lib.dir().is_dir());
        assert!(lib.list().unwrap().is_empty());
    }

    #[test]
    fn open_fails_when_a_file_is_in_the_way() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("macros");
        fs::write(&blocker, "not a directory").unwrap();
        assert!(matches!(
            MacroLibrary::open(&blocker),
            Err(Error::MacroDirectory { .. })
        ));
    }

    #[test]
    fn save_list_load() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = MacroLibrary::open(tmp.path()).unwrap();
        lib.save("zeta", &tap(), false).unwrap();
        lib.save("alpha", &tap(), false).unwrap();

        assert_eq!(lib.list().unwrap(), vec!["alpha", "zeta"]);
        assert!(lib.contains("alpha"));
        assert_eq!(lib.load("alpha").unwrap().log, tap());
    }

    #[test]
    fn save_respects_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = MacroLibrary::open(tmp.path()).unwrap();
        lib.save("m", &tap(), false).unwrap();
        assert!(matches!(
            lib.save("m", &EventLog::new(), false),
            Err(Error::MacroExists(_))
        ));
        lib.save("m", &EventLog::new(), true).unwrap();
        assert!(lib.load("m").unwrap().log.is_empty());
    }

    #[test]
    fn missing_and_invalid_names() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = MacroLibrary::open(tmp.path()).unwrap();
        assert!(matches!(lib.load("nope"), Err(Error::MacroNotFound(_))));
        for name in ["", "..", "../etc", "a/b", "a\\b"] {
            assert!(
                matches!(lib.path_for(name), Err(Error::InvalidMacroName(_))),
                "{name:?}"
            );
        }
    }
}
