//! The interactive probe shell.
//!
//! A thin collaborator over the engine: it tracks a working directory,
//! turns user-relative input (`.`, `..`, quoting) into the absolute paths
//! [`IsoFs::resolve`] requires, and renders listings and hex dumps. All
//! filesystem failures are printed and the loop continues.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use log::LevelFilter;

use crate::fs::IsoFs;
use crate::record::DataRecord;

/// Bytes shown by `peek`.
const PEEK_LENGTH: usize = 128;

/// What the dispatcher wants the REPL to do next.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Exit,
}

/// Shell state: the loaded image, its working directory, and the logging
/// toggle.
pub struct Shell {
    media: Option<LoadedImage>,
    logging_enabled: bool,
}

struct LoadedImage {
    fs: IsoFs<File>,
    cwd: String,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Self {
        Self {
            media: None,
            logging_enabled: true,
        }
    }

    /// The prompt prefix: the working directory, or a hint to load.
    pub fn prompt(&self) -> &str {
        match &self.media {
            Some(image) => &image.cwd,
            None => "(no disk)",
        }
    }

    /// Loads an image by path, as the `load` command would.
    pub fn load_image(&mut self, path: &str) {
        self.cmd_load(&[path.to_string()]);
    }

    /// Parses and runs one input line.
    pub fn execute(&mut self, line: &str) -> Outcome {
        let tokens = tokenize(line);
        let Some((command, args)) = tokens.split_first() else {
            return Outcome::Continue;
        };

        match command.to_ascii_lowercase().as_str() {
            "help" => self.cmd_help(),
            "load" => self.cmd_load(args),
            "close" => self.cmd_close(),
            "ls" => self.cmd_list(args),
            "cd" => self.cmd_change_directory(args),
            "peek" => self.cmd_peek(args),
            "dump" => self.cmd_dump(args),
            "log" => self.cmd_toggle_logging(),
            "exit" | "quit" => return Outcome::Exit,
            other => println!("Command not found: {other}"),
        }
        Outcome::Continue
    }

    fn cmd_help(&self) {
        println!("Commands:");
        println!("  load <image>        open an ISO-9660 image file");
        println!("  close               unload the current image");
        println!("  ls [path]           list a directory");
        println!("  cd <path>           change the working directory");
        println!("  peek [--raw] <file> show the first {PEEK_LENGTH} bytes of a file");
        println!("  dump <file> <out>   copy a file to the host filesystem");
        println!("  log                 toggle engine logging");
        println!("  exit                leave the shell");
    }

    fn cmd_load(&mut self, args: &[String]) {
        let Some(path) = args.first() else {
            println!("Usage: load <image>");
            return;
        };
        if self.media.is_some() {
            self.cmd_close();
        }

        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) => {
                println!("Unable to open {path}: {err}");
                return;
            }
        };
        match IsoFs::open(file) {
            Ok(fs) => {
                let volume = fs.volume();
                println!(
                    "Loaded {:?} ({} blocks of {} bytes{}{})",
                    volume.volume_id,
                    volume.logical_block_count,
                    volume.logical_block_size,
                    if fs.geometry().is_raw() { ", raw sectors" } else { "" },
                    if fs.is_joliet() { ", Joliet" } else { "" },
                );
                self.media = Some(LoadedImage {
                    fs,
                    cwd: "/".to_string(),
                });
            }
            Err(err) => println!("Error loading disk: {err}"),
        }
    }

    fn cmd_close(&mut self) {
        if self.media.take().is_some() {
            println!("Disk closed");
        } else {
            println!("No disk loaded");
        }
    }

    fn cmd_list(&mut self, args: &[String]) {
        let Some(image) = &self.media else {
            println!("No disk loaded!");
            return;
        };
        let path = match args.first() {
            Some(arg) => resolve_user_path(&image.cwd, arg),
            None => image.cwd.clone(),
        };

        let record = match image.fs.resolve(&path) {
            Ok(Some(record)) if record.is_directory() => record,
            Ok(_) => {
                println!("No such directory: {path}");
                return;
            }
            Err(err) => {
                println!("Error reading {path}: {err}");
                return;
            }
        };

        match image.fs.children(&record) {
            Ok(children) => {
                for child in children {
                    println!("{}", list_line(&image.fs, &child));
                }
            }
            Err(err) => println!("Error listing {path}: {err}"),
        }
    }

    fn cmd_change_directory(&mut self, args: &[String]) {
        let Some(image) = &mut self.media else {
            println!("No disk loaded!");
            return;
        };
        let Some(arg) = args.first() else {
            println!("Usage: cd <path>");
            return;
        };

        let path = resolve_user_path(&image.cwd, arg);
        match image.fs.resolve(&path) {
            Ok(Some(record)) if record.is_directory() => image.cwd = path,
            Ok(_) => println!("No such directory: {path}"),
            Err(err) => println!("Error reading {path}: {err}"),
        }
    }

    fn cmd_peek(&mut self, args: &[String]) {
        let (raw_mode, name) = match args {
            [name] => (false, name),
            [flag, name] if flag.eq_ignore_ascii_case("--raw") => (true, name),
            [flag, _] => {
                println!("error: unknown flag {flag}");
                return;
            }
            _ => {
                println!("Usage: peek <file> OR peek --raw <file>");
                return;
            }
        };
        let Some(image) = &self.media else {
            println!("No disk loaded!");
            return;
        };

        let path = resolve_user_path(&image.cwd, name);
        let record = match image.fs.resolve(&path) {
            Ok(Some(record)) if !record.is_directory() => record,
            Ok(_) => {
                println!("Error, item does not exist or is a directory: {path}");
                return;
            }
            Err(err) => {
                println!("Error reading {path}: {err}");
                return;
            }
        };

        let mut head = match image.fs.content_chunks(&record).next() {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => {
                println!("Error reading {path}: {err}");
                return;
            }
            None => Vec::new(),
        };
        head.truncate(PEEK_LENGTH);

        let separator = "-".repeat(71);
        println!("Dumping: {}", record.fully_qualified_identifier());
        println!("{separator}");
        if raw_mode {
            println!("{}", String::from_utf8_lossy(&head));
        } else {
            print!("{}", hex_dump(&head));
        }
        println!("{separator}");
    }

    fn cmd_dump(&mut self, args: &[String]) {
        let [name, out_path] = args else {
            println!("Usage: dump <file> <saveLocation>");
            return;
        };
        let Some(image) = &self.media else {
            println!("No disk loaded!");
            return;
        };

        let path = resolve_user_path(&image.cwd, name);
        let record = match image.fs.resolve(&path) {
            Ok(Some(record)) if !record.is_directory() => record,
            Ok(_) => {
                println!("Error: {path} does not exist or is a directory!");
                return;
            }
            Err(err) => {
                println!("Error reading {path}: {err}");
                return;
            }
        };

        let out_path = PathBuf::from(out_path);
        let mut writer = match File::create(&out_path) {
            Ok(writer) => writer,
            Err(err) => {
                println!("Could not open output file {}: {err}", out_path.display());
                return;
            }
        };

        let mut written = 0usize;
        for chunk in image.fs.content_chunks(&record) {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    println!("Error reading {path}: {err}");
                    return;
                }
            };
            if let Err(err) = writer.write_all(&chunk) {
                println!("Error writing {}: {err}", out_path.display());
                return;
            }
            written += chunk.len();
        }

        if written < 2048 {
            println!("Wrote {written} bytes to file: {}", out_path.display());
        } else {
            println!(
                "Wrote {:.1} kb to file: {}",
                written as f64 / 1000.0,
                out_path.display()
            );
        }
    }

    fn cmd_toggle_logging(&mut self) {
        self.logging_enabled = !self.logging_enabled;
        log::set_max_level(if self.logging_enabled {
            LevelFilter::Trace
        } else {
            LevelFilter::Off
        });
        println!(
            "Logging {}",
            if self.logging_enabled { "enabled" } else { "disabled" }
        );
    }
}

/// One `ls` line: directories show their entry count, files their size.
fn list_line(fs: &IsoFs<File>, record: &Rc<DataRecord>) -> String {
    if record.is_directory() {
        let items = fs.children(record).map(|c| c.len()).unwrap_or(0);
        format!("{:<9} [{items} items]", record.identifier())
    } else {
        let length = record.data_length();
        let size = if length > 1999 {
            format!("{:.1} kb", length as f64 / 1000.0)
        } else {
            format!("{length} b")
        };
        format!("{:<15} [{size}]", record.identifier())
    }
}

/// Renders bytes 16 per line with an offset column and an ASCII gutter,
/// unprintable bytes shown as `.`.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (line_index, line) in data.chunks(16).enumerate() {
        out.push_str(&format!("0x{:04X}: ", line_index * 16));
        for byte in line {
            out.push_str(&format!("0x{byte:02X} "));
        }
        for _ in line.len()..16 {
            out.push_str("     ");
        }
        out.push_str(" | ");
        for &byte in line {
            let printable = (32..=126).contains(&byte);
            out.push(if printable { byte as char } else { '.' });
        }
        out.push('\n');
    }
    out
}

/// Turns user input into the absolute, lexically normalized path the
/// resolver requires: relative input is joined to the working directory,
/// and `.`, `..` and empty segments are folded away.
pub fn resolve_user_path(cwd: &str, input: &str) -> String {
    let joined = if input.starts_with('/') {
        input.to_string()
    } else {
        format!("{cwd}/{input}")
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Splits a command line on whitespace, keeping double-quoted stretches
/// together.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
