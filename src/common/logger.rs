use std::{
  collections::VecDeque,
  fs::{self, File, OpenOptions},
  io::{self, BufRead, BufReader, Write},
  path::{Path, PathBuf},
  sync::{Arc, OnceLock},
};

use parking_lot::Mutex;
use tracing_subscriber::{
  EnvFilter,
  fmt::{self, MakeWriter, time::LocalTime},
  prelude::*,
};

use crate::configs::{Config, LogFileConfig};

static LOG_FILE: OnceLock<LineCappedFile> = OnceLock::new();

/// `eprintln!` that is mirrored into the log file once logging is up.
///
/// Stdout is reserved for the PCM sink.
#[macro_export]
macro_rules! log_println {
    () => {{
        std::eprintln!();
        $crate::common::logger::mirror_to_file("\n");
    }};
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        std::eprintln!("{}", msg);
        $crate::common::logger::mirror_to_file(&format!("{}\n", msg));
    }};
}

pub fn mirror_to_file(msg: &str) {
  if let Some(file) = LOG_FILE.get() {
    let _ = file.append(strip_ansi(msg).as_bytes());
  }
}

fn strip_ansi(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut chars = s.chars();
  while let Some(c) = chars.next() {
    if c != '\x1b' {
      out.push(c);
      continue;
    }
    // Skip the CSI body up to its final letter.
    for c in chars.by_ref() {
      if c.is_ascii_alphabetic() {
        break;
      }
    }
  }
  out
}

/// `logging.level` plus the comma-joined `logging.filters`.
fn directive(config: &Config) -> String {
  let logging = config.logging.as_ref();
  let level = logging
    .and_then(|l| l.level.as_deref())
    .unwrap_or("info");

  match logging.and_then(|l| l.filters.as_deref()) {
    Some(filters) if !filters.trim().is_empty() => format!("{},{}", level, filters.trim()),
    _ => level.to_string(),
  }
}

pub fn init(config: &Config) {
  // RUST_LOG wins over the configured directive
  let env_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(config)));

  let console = fmt::layer()
    .with_writer(io::stderr)
    .with_timer(LocalTime::rfc_3339())
    .with_target(true)
    .with_line_number(true);

  let file = config
    .logging
    .as_ref()
    .and_then(|logging| logging.file.as_ref())
    .and_then(|file_config| match LineCappedFile::open(file_config) {
      Ok(file) => Some(LOG_FILE.get_or_init(|| file).clone()),
      Err(e) => {
        eprintln!("Log file {} unavailable: {}", file_config.path, e);
        None
      }
    })
    .map(|file| {
      fmt::layer()
        .with_writer(file)
        .with_timer(LocalTime::rfc_3339())
        .with_target(true)
        .with_line_number(true)
        .with_ansi(false)
    });

  tracing_subscriber::registry()
    .with(env_filter)
    .with(console)
    .with(file)
    .init();
}

/// An append-only log file that keeps at most `max_lines` lines.
///
/// The file is compacted once the line count overshoots the cap by a
/// tenth (at least 50 lines), so most writes are a plain append.
#[derive(Clone)]
pub(crate) struct LineCappedFile {
  inner: Arc<Mutex<FileState>>,
}

struct FileState {
  path: PathBuf,
  file: File,
  lines: usize,
  max_lines: usize,
}

impl LineCappedFile {
  fn open(config: &LogFileConfig) -> io::Result<Self> {
    let path = PathBuf::from(&config.path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      fs::create_dir_all(parent)?;
    }
    let lines = count_lines(&path)?;
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    Ok(Self {
      inner: Arc::new(Mutex::new(FileState {
        path,
        file,
        lines,
        max_lines: config.max_lines.max(1) as usize,
      })),
    })
  }

  fn append(&self, buf: &[u8]) -> io::Result<()> {
    let mut state = self.inner.lock();
    state.file.write_all(buf)?;
    state.lines += buf.iter().filter(|&&b| b == b'\n').count();

    let slack = (state.max_lines / 10).max(50);
    if state.lines >= state.max_lines + slack {
      state.compact()?;
    }
    Ok(())
  }
}

impl FileState {
  fn compact(&mut self) -> io::Result<()> {
    let mut tail = VecDeque::with_capacity(self.max_lines);
    for line in BufReader::new(File::open(&self.path)?).lines() {
      if tail.len() == self.max_lines {
        tail.pop_front();
      }
      tail.push_back(line?);
    }

    let mut file = File::create(&self.path)?;
    for line in &tail {
      writeln!(file, "{}", line)?;
    }
    self.lines = tail.len();
    self.file = OpenOptions::new().append(true).open(&self.path)?;
    Ok(())
  }
}

fn count_lines(path: &Path) -> io::Result<usize> {
  match File::open(path) {
    Ok(file) => Ok(BufReader::new(file).lines().count()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
    Err(e) => Err(e),
  }
}

impl io::Write for LineCappedFile {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.append(buf)?;
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    self.inner.lock().file.flush()
  }
}

impl<'a> MakeWriter<'a> for LineCappedFile {
  type Writer = Self;

  fn make_writer(&'a self) -> Self::Writer {
    self.clone()
  }
}
