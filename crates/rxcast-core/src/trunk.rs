//! Trunk file access.
//!
//! The receiver reads its trunked system definition from a tab-separated
//! file whose first row names the columns. Fields are usually wrapped in
//! double quotes. Only the system name and control channel list are
//! editable here; every other column and row is preserved on write.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TrunkError;

/// Column holding the system name.
pub const SYSNAME_COLUMN: &str = "Sysname";

/// Column holding the comma-separated control channel frequencies.
pub const CONTROL_CHANNEL_COLUMN: &str = "Control Channel List";

/// Header written when the file does not exist yet.
const DEFAULT_HEADER: [&str; 9] = [
    SYSNAME_COLUMN,
    CONTROL_CHANNEL_COLUMN,
    "Offset",
    "NAC",
    "Modulation",
    "TGID Tags File",
    "Whitelist",
    "Blacklist",
    "Center Frequency",
];

/// The editable part of a trunk system row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrunkSystem {
    pub sysname: String,
    pub control_channel: String,
}

/// Reads the first system row of a trunk file.
pub fn read_trunk_system(path: &Path) -> Result<TrunkSystem, TrunkError> {
    let text = fs::read_to_string(path).map_err(|source| TrunkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table = Table::parse(&text);

    let sys_col = table.column(path, SYSNAME_COLUMN)?;
    let cc_col = table.column(path, CONTROL_CHANNEL_COLUMN)?;
    let row = table.rows.first().ok_or_else(|| TrunkError::MissingRow {
        path: path.to_path_buf(),
    })?;

    Ok(TrunkSystem {
        sysname: row.get(sys_col).cloned().unwrap_or_default(),
        control_channel: row.get(cc_col).cloned().unwrap_or_default(),
    })
}

/// Writes the system name and control channel into the first system row.
///
/// Creates the file with the standard header when it does not exist.
pub fn write_trunk_system(path: &Path, system: &TrunkSystem) -> Result<(), TrunkError> {
    let mut table = match fs::read_to_string(path) {
        Ok(text) => Table::parse(&text),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Trunk file missing, creating");
            Table::empty()
        }
        Err(source) => {
            return Err(TrunkError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let sys_col = table.column(path, SYSNAME_COLUMN)?;
    let cc_col = table.column(path, CONTROL_CHANNEL_COLUMN)?;
    let width = table.header.len();

    if table.rows.is_empty() {
        table.rows.push(vec![String::new(); width]);
    }
    if let Some(row) = table.rows.first_mut() {
        if row.len() < width {
            row.resize(width, String::new());
        }
        if let Some(field) = row.get_mut(sys_col) {
            *field = system.sysname.clone();
        }
        if let Some(field) = row.get_mut(cc_col) {
            *field = system.control_channel.clone();
        }
    }

    fs::write(path, table.render()).map_err(|source| TrunkError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parsed tab-separated file.
struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn empty() -> Self {
        Self {
            header: DEFAULT_HEADER.iter().map(|s| (*s).to_string()).collect(),
            rows: Vec::new(),
        }
    }

    fn parse(text: &str) -> Self {
        let mut lines = text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty());

        let header = lines.next().map(split_fields).unwrap_or_default();
        let rows = lines.map(split_fields).collect();
        Self { header, rows }
    }

    fn column(&self, path: &Path, name: &str) -> Result<usize, TrunkError> {
        self.header
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| TrunkError::MissingColumn {
                path: path.to_path_buf(),
                column: name.to_string(),
            })
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for row in std::iter::once(&self.header).chain(self.rows.iter()) {
            let line: Vec<String> = row.iter().map(|f| format!("\"{f}\"")).collect();
            out.push_str(&line.join("\t"));
            out.push('\n');
        }
        out
    }
}

fn split_fields(line: &str) -> Vec<String> {
    line.split('\t').map(unquote).collect()
}

fn unquote(field: &str) -> String {
    let trimmed = field.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\"Sysname\"\t\"Control Channel List\"\t\"Offset\"\t\"NAC\"\t\"Modulation\"\t\"TGID Tags File\"\t\"Whitelist\"\t\"Blacklist\"\t\"Center Frequency\"\n\
\"County P25\"\t\"851.0125,851.2625\"\t\"0\"\t\"0x293\"\t\"cqpsk\"\t\"tags.tsv\"\t\"\"\t\"\"\t\"\"\n";

    #[test]
    fn test_read_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunk.tsv");
        fs::write(&path, SAMPLE).unwrap();

        let sys = read_trunk_system(&path).unwrap();
        assert_eq!(sys.sysname, "County P25");
        assert_eq!(sys.control_channel, "851.0125,851.2625");
    }

    #[test]
    fn test_write_preserves_other_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunk.tsv");
        fs::write(&path, SAMPLE).unwrap();

        let new = TrunkSystem {
            sysname: "City".to_string(),
            control_channel: "852.5".to_string(),
        };
        write_trunk_system(&path, &new).unwrap();

        assert_eq!(read_trunk_system(&path).unwrap(), new);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"0x293\""));
        assert!(text.contains("\"tags.tsv\""));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_write_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.tsv");
        let sys = TrunkSystem {
            sysname: "New".to_string(),
            control_channel: "460.1".to_string(),
        };
        write_trunk_system(&path, &sys).unwrap();

        assert_eq!(read_trunk_system(&path).unwrap(), sys);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("\"Sysname\"\t\"Control Channel List\""));
    }

    #[test]
    fn test_read_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunk.tsv");
        fs::write(&path, "\"Name\"\t\"Freq\"\n\"a\"\t\"b\"\n").unwrap();

        let err = read_trunk_system(&path).unwrap_err();
        assert!(matches!(err, TrunkError::MissingColumn { ref column, .. } if column == SYSNAME_COLUMN));
    }

    #[test]
    fn test_read_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunk.tsv");
        fs::write(&path, "\"Sysname\"\t\"Control Channel List\"\n").unwrap();

        assert!(matches!(
            read_trunk_system(&path),
            Err(TrunkError::MissingRow { .. })
        ));
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_trunk_system(&dir.path().join("none.tsv")),
            Err(TrunkError::Io { .. })
        ));
    }

    #[test]
    fn test_unquoted_and_crlf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunk.tsv");
        fs::write(&path, "Sysname\tControl Channel List\r\nPlain\t851.5\r\n").unwrap();

        let sys = read_trunk_system(&path).unwrap();
        assert_eq!(sys.sysname, "Plain");
        assert_eq!(sys.control_channel, "851.5");
    }
}
