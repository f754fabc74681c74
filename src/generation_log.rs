use std::{
    borrow::Cow,
    collections::VecDeque,
    fs::{self, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use parking_lot::Mutex;

const PROMPT_PREVIEW_CHARS: usize = 100;
const OUTPUT_PREVIEW_CHARS: usize = 200;

/// One generation as written to the audit log.
#[derive(Debug, Clone)]
pub struct LogEntry<'a> {
    pub timestamp: DateTime<Local>,
    pub prompt: &'a str,
    pub temperature: f64,
    pub time_taken: f64,
    pub output: &'a str,
}

impl LogEntry<'_> {
    /// `timestamp | prompt | temperature | seconds | output`, newline terminated.
    pub fn to_line(&self) -> String {
        format!(
            "{} | {} | {:?} | {:.2}s | {}\n",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            single_line(&preview(self.prompt, PROMPT_PREVIEW_CHARS)),
            self.temperature,
            self.time_taken,
            single_line(&preview(self.output, OUTPUT_PREVIEW_CHARS)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTail {
    pub entries: Vec<String>,
    pub total_entries: usize,
}

/// Append-only text log of generations.
pub struct GenerationLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl GenerationLog {
    /// Creates the parent directory; the file itself appears on first append.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry. Callers treat failures as non-fatal.
    pub fn append(&self, entry: &LogEntry<'_>) -> io::Result<()> {
        let line = entry.to_line();
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()
    }

    /// Last `lines` entries in chronological order, or `None` before the
    /// first append.
    pub fn tail(&self, lines: usize) -> io::Result<Option<LogTail>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        let mut window = VecDeque::with_capacity(lines.min(1024));
        let mut total_entries = 0;
        for line in BufReader::new(file).lines() {
            let line = line?;
            total_entries += 1;
            if lines == 0 {
                continue;
            }
            if window.len() == lines {
                window.pop_front();
            }
            window.push_back(line.trim().to_string());
        }

        Ok(Some(LogTail {
            entries: window.into(),
            total_entries,
        }))
    }
}

/// First `max` characters, with `...` appended when anything was cut.
pub fn preview(text: &str, max: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max) {
        Some((cut, _)) => Cow::Owned(format!("{}...", &text[..cut])),
        None => Cow::Borrowed(text),
    }
}

fn single_line(text: &str) -> Cow<'_, str> {
    if text.contains(['\n', '\r']) {
        Cow::Owned(text.replace(['\n', '\r'], " "))
    } else {
        Cow::Borrowed(text)
    }
}
