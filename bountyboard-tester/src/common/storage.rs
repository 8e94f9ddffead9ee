use std::cell::RefCell;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bountyboard_game::{BountyRecord, BountyStorage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access board file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("board file {path} is not valid: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Boards saved as pretty JSON files, one per board, under a directory.
#[derive(Debug, Clone)]
pub struct JsonBoardStore {
    dir: PathBuf,
}

impl JsonBoardStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, board: &str) -> PathBuf {
        self.dir.join(format!("{board}.json"))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl BountyStorage for JsonBoardStore {
    type Error = StorageError;

    fn save_board(&self, board: &str, records: &[BountyRecord]) -> Result<(), Self::Error> {
        fs::create_dir_all(&self.dir).map_err(|source| io_error(&self.dir, source))?;
        let path = self.path_for(board);
        let json = serde_json::to_vec_pretty(records).map_err(|source| StorageError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| io_error(&path, source))
    }

    fn load_board(&self, board: &str) -> Result<Option<Vec<BountyRecord>>, Self::Error> {
        let path = self.path_for(board);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(&path, source)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Json { path, source })
    }

    fn delete_board(&self, board: &str) -> Result<(), Self::Error> {
        let path = self.path_for(board);
        match fs::remove_file(&path) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(io_error(&path, err)),
            _ => Ok(()),
        }
    }
}

/// In-process boards for simulations.
#[derive(Debug, Default)]
pub struct MemoryBoards {
    boards: RefCell<HashMap<String, Vec<BountyRecord>>>,
}

impl BountyStorage for MemoryBoards {
    type Error = Infallible;

    fn save_board(&self, board: &str, records: &[BountyRecord]) -> Result<(), Self::Error> {
        self.boards
            .borrow_mut()
            .insert(board.to_string(), records.to_vec());
        Ok(())
    }

    fn load_board(&self, board: &str) -> Result<Option<Vec<BountyRecord>>, Self::Error> {
        Ok(self.boards.borrow().get(board).cloned())
    }

    fn delete_board(&self, board: &str) -> Result<(), Self::Error> {
        self.boards.borrow_mut().remove(board);
        Ok(())
    }
}
