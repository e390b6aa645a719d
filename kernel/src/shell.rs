//! Filesystem commands for the kernel terminal.
//!
//! Every command works on the session it is handed and returns the lines to
//! print. Failures come back as a line of text too; nothing here can take
//! the shell down.

use alloc::{
    format,
    string::{String, ToString},
    vec,
    vec::Vec,
};
use config::CONFIG;

use crate::fs::{BlockDevice, FsError, Session, WriteMode};

pub struct Shell {
    command_history: Vec<String>,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

/// `cmd name` or `cmd path name`; a single argument lives in the working directory
fn target<'a>(args: &[&'a str]) -> Option<(&'a str, &'a str)> {
    match *args {
        [name] => Some(("", name)),
        [dir, name] => Some((dir, name)),
        _ => None,
    }
}

/// Split `dir/name` into its two parts
fn split_file_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

impl Shell {
    pub fn new() -> Self {
        Shell {
            command_history: Vec::new(),
        }
    }

    /// Prompt showing the working directory of the selected partition
    pub fn prompt<D: BlockDevice>(&self, session: &Session<D>) -> String {
        format!("{}{}", session.cwd_path(), CONFIG.shell_prompt)
    }

    pub fn history(&self) -> &[String] {
        &self.command_history
    }

    pub fn process_command<D: BlockDevice>(&mut self, session: &mut Session<D>, cmd: &str) -> Vec<String> {
        let mut parts = cmd.split_whitespace();
        let Some(first_part) = parts.next() else {
            return Vec::new();
        };
        self.command_history.push(cmd.trim().to_string());
        let args: Vec<&str> = parts.collect();

        match first_part {
            "help" => vec![
                "Available commands:".into(),
                "  help                 - Show this help".into(),
                "  echo <text>          - Print arguments".into(),
                "  pwd                  - Show working directory".into(),
                "  ls [path]            - List a directory".into(),
                "  tree [path]          - List a directory recursively".into(),
                "  cd [path]            - Change working directory".into(),
                "  mkdir [path] <name>  - Create a directory".into(),
                "  rmdir [path] <name>  - Delete a directory and its contents".into(),
                "  touch [path] <name>  - Create an empty file".into(),
                "  rm [path] <name>     - Delete a file".into(),
                "  cat [path] <name>    - Show file contents".into(),
                "  write <file> <text>  - Replace file contents".into(),
                "  append <file> <text> - Add text as a new line at the end of a file".into(),
                "  df                   - Show free space".into(),
                "  parts                - List mounted partitions".into(),
                "  use <n>              - Switch to partition n".into(),
                "  history              - Show previous commands".into(),
                "  version              - Show OS version".into(),
                "".into(),
            ],
            "echo" => vec![args.join(" ")],
            "pwd" => vec![session.cwd_path().into()],
            "version" => vec![format!("{} v{}", CONFIG.os_name, CONFIG.os_version)],
            "history" => self
                .command_history
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{:4}  {}", i + 1, c))
                .collect(),
            "ls" => self.list_command(session, args.first().copied().unwrap_or("")),
            "tree" => self.tree_command(session, args.first().copied().unwrap_or("")),
            "cd" => {
                let path = args.first().copied().unwrap_or("/");
                match session.fs().change_working_directory(path) {
                    Ok(()) => Vec::new(),
                    Err(e) => vec![format!("cd: {}: {}", path, e)],
                }
            }
            "mkdir" | "rmdir" | "touch" | "rm" | "cat" => match target(&args) {
                Some((dir, name)) => self.entry_command(session, first_part, dir, name),
                None => vec![format!("Usage: {} [path] <name>", first_part)],
            },
            "write" | "append" => match args.split_first() {
                Some((file, text)) if !text.is_empty() => {
                    let (dir, name) = split_file_path(file);
                    let mode = if first_part == "write" {
                        WriteMode::Rewrite
                    } else {
                        WriteMode::Append
                    };
                    let mut data = text.join(" ");
                    // appended text starts on its own line; the count below includes the newline
                    if mode == WriteMode::Append {
                        data.insert(0, '\n');
                    }
                    self.write_command(session, first_part, dir, name, data.as_bytes(), mode)
                }
                _ => vec![format!("Usage: {} <file> <text>", first_part)],
            },
            "df" => {
                let space = session.fs().free_space();
                vec![format!(
                    "{} of {} clusters free ({} of {} bytes)",
                    space.free_clusters,
                    space.total_clusters,
                    space.free_bytes(),
                    space.total_bytes()
                )]
            }
            "parts" => session
                .partitions()
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    format!(
                        "{} {}: LBA {}, {} clusters of {} bytes, {} free",
                        if i == session.current_partition() { '*' } else { ' ' },
                        i,
                        p.partition_lba,
                        p.cluster_count,
                        p.cluster_bytes(),
                        p.free_cluster_count
                    )
                })
                .collect(),
            "use" => match args.first().and_then(|n| n.parse::<usize>().ok()) {
                Some(index) => match session.select_partition(index) {
                    Ok(()) => vec![format!("Using partition {}", index)],
                    Err(e) => vec![format!("use: {}: {}", index, e)],
                },
                None => vec!["Usage: use <n>".into()],
            },
            _ => vec![format!("Command not found: {}", first_part)],
        }
    }

    fn list_command<D: BlockDevice>(&self, session: &mut Session<D>, path: &str) -> Vec<String> {
        match session.fs().read_directory(path) {
            Ok(entries) if entries.is_empty() => vec!["(empty)".into()],
            Ok(entries) => entries
                .iter()
                .map(|e| {
                    if e.is_directory {
                        format!("{:>10}  {}", "<DIR>", e.name)
                    } else {
                        format!("{:>10}  {}", e.size, e.name)
                    }
                })
                .collect(),
            Err(e) => vec![format!("ls: {}: {}", path, e)],
        }
    }

    fn tree_command<D: BlockDevice>(&self, session: &mut Session<D>, path: &str) -> Vec<String> {
        match session.fs().tree(path) {
            Ok(lines) => lines
                .iter()
                .map(|t| {
                    let suffix = if t.entry.is_directory { "/" } else { "" };
                    format!("{}{}{}", "  ".repeat(t.depth), t.entry.name, suffix)
                })
                .collect(),
            Err(e) => vec![format!("tree: {}: {}", path, e)],
        }
    }

    fn entry_command<D: BlockDevice>(
        &self,
        session: &mut Session<D>,
        cmd: &str,
        dir: &str,
        name: &str,
    ) -> Vec<String> {
        let mut fs = session.fs();
        let result = match cmd {
            "mkdir" => fs.create_directory(dir, name).map(|_| Vec::new()),
            "rmdir" => fs.delete_directory(dir, name).map(|_| Vec::new()),
            "touch" => fs.create_file(dir, name).map(|_| Vec::new()),
            "rm" => fs.delete_file(dir, name).map(|_| Vec::new()),
            _ => fs.read_file(dir, name).map(|data| {
                String::from_utf8_lossy(&data)
                    .lines()
                    .map(String::from)
                    .collect()
            }),
        };
        result.unwrap_or_else(|e| vec![format!("{}: {}: {}", cmd, name, e)])
    }

    fn write_command<D: BlockDevice>(
        &self,
        session: &mut Session<D>,
        cmd: &str,
        dir: &str,
        name: &str,
        data: &[u8],
        mode: WriteMode,
    ) -> Vec<String> {
        let mut fs = session.fs();
        // `write` creates the file when it is missing
        let exists = fs.file_exists(&format!("{}/{}", if dir.is_empty() { "." } else { dir }, name));
        let prepared = match exists {
            Ok(true) => Ok(()),
            Ok(false) if mode == WriteMode::Rewrite => fs.create_file(dir, name),
            Ok(false) => Err(FsError::NotFound),
            Err(e) => Err(e),
        };
        match prepared.and_then(|_| fs.write_file(dir, name, data, mode)) {
            Ok(()) => vec![format!("{} bytes written", data.len())],
            Err(e) => vec![format!("{}: {}: {}", cmd, name, e)],
        }
    }
}
