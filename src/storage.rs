//! Deciding which file backs an array and keeping track of positions in shared files.
//!
//! MODFLOW refers to external files by unit number. The [`UnitTable`] maps unit numbers
//! to paths (usually from the model's name file) and the [`StorageResolver`] turns the
//! storage metadata of one layer into a [`StorageDirective`] and opens the right file.
//! EXTERNAL units are read and written sequentially: a second array on the same unit
//! continues where the first one ended.
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::debug;

use crate::array::{ArrayValue, Layer, StorageMode};
use crate::codec_error::{AError, AResult};
use crate::parsing::ListTokens;

/// A file connected to a unit number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalFile {
    pub unit: i32,
    pub path: PathBuf,
    pub binary: bool,
    /// The file type from the name file, e.g. `DATA` or `DATA(BINARY)`
    pub ftype: String,
}

impl ExternalFile {
    pub fn new<P: AsRef<Path>>(unit: i32, path: P, binary: bool) -> Self {
        let ftype = if binary { "DATA(BINARY)" } else { "DATA" };
        Self { unit, path: path.as_ref().to_path_buf(), binary, ftype: ftype.to_string() }
    }
}

/// Unit numbers and the files they refer to, in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitTable {
    files: IndexMap<i32, ExternalFile>,
}

impl UnitTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, replacing any previous file on the same unit
    pub fn insert(&mut self, file: ExternalFile) -> Option<ExternalFile> {
        self.files.insert(file.unit, file)
    }

    pub fn with_file(mut self, file: ExternalFile) -> Self {
        self.insert(file);
        self
    }

    pub fn get(&self, unit: i32) -> Option<&ExternalFile> {
        self.files.get(&unit)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExternalFile> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Read a MODFLOW name file: one `FTYPE UNIT FNAME [STATUS]` entry per line,
    /// with `#` starting a comment line.
    pub fn parse_name_file<R: BufRead>(rdr: R) -> AResult<Self> {
        let mut table = Self::new();
        for line in rdr.lines() {
            let line = line.map_err(AError::ReadError)?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let toks = ListTokens::keep_slashes(trimmed).collect_all()?;
            if toks.len() < 3 {
                return Err(AError::header(trimmed, "name file entries need a file type, unit and file name"));
            }
            let ftype = toks[0].to_ascii_uppercase();
            let unit: i32 = toks[1].parse()
                .map_err(|_| AError::header(trimmed, format!("'{}' is not a unit number", toks[1])))?;
            let binary = ftype == "DATA(BINARY)";
            table.insert(ExternalFile { unit, path: PathBuf::from(toks[2]), binary, ftype });
        }
        Ok(table)
    }

    /// Render the table as name file lines
    pub fn to_name_file(&self) -> String {
        let mut out = String::new();
        for f in self.files.values() {
            out.push_str(&format!("{:<14} {:>5}  {}\n", f.ftype, f.unit, f.path.display()));
        }
        out
    }
}

/// The physical location that backs one layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageDirective {
    /// No data, the control record holds the value
    Constant,
    /// The data follow the control record
    Inline,
    /// The data are in the file connected to this unit
    Unit(i32),
    /// The data are in this file, relative to the workspace unless absolute
    File(PathBuf),
}

/// What a fixed-format `LOCAT` value means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatKind {
    pub mode: StorageMode,
    pub unit: Option<i32>,
    pub binary: bool,
}

/// Classify a `LOCAT` code: 0 is a constant, the package's own unit is internal data,
/// any other positive unit is formatted external data and a negative one is binary.
pub fn classify_locat(locat: i32, package_unit: Option<i32>) -> LocatKind {
    if locat == 0 {
        LocatKind { mode: StorageMode::Constant, unit: None, binary: false }
    } else if Some(locat) == package_unit {
        LocatKind { mode: StorageMode::Internal, unit: None, binary: false }
    } else if locat > 0 {
        LocatKind { mode: StorageMode::External, unit: Some(locat), binary: false }
    } else {
        LocatKind { mode: StorageMode::External, unit: Some(-locat), binary: true }
    }
}

/// Resolves storage directives to files within a model workspace.
#[derive(Debug, Clone)]
pub struct StorageResolver {
    workspace: PathBuf,
    units: UnitTable,
    package_unit: Option<i32>,
    read_pos: HashMap<i32, u64>,
    write_pos: HashMap<i32, u64>,
}

impl Default for StorageResolver {
    fn default() -> Self {
        Self::new(".")
    }
}

impl StorageResolver {
    pub fn new<P: AsRef<Path>>(workspace: P) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
            units: UnitTable::new(),
            package_unit: None,
            read_pos: HashMap::new(),
            write_pos: HashMap::new(),
        }
    }

    pub fn with_units(mut self, units: UnitTable) -> Self {
        self.units = units;
        self
    }

    /// Set the unit of the package file being read or written, which is the `LOCAT`
    /// of internal arrays in fixed-format control records.
    pub fn with_package_unit(mut self, unit: i32) -> Self {
        self.package_unit = Some(unit);
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn units(&self) -> &UnitTable {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut UnitTable {
        &mut self.units
    }

    pub fn package_unit(&self) -> Option<i32> {
        self.package_unit
    }

    pub fn classify_locat(&self, locat: i32) -> LocatKind {
        classify_locat(locat, self.package_unit)
    }

    /// The directive for writing `layer`, taking CONSTANT to INTERNAL promotion into account.
    pub fn directive_for<T: ArrayValue>(&self, name: &str, layer: &Layer<T>) -> AResult<StorageDirective> {
        match layer.effective_mode() {
            StorageMode::Constant => Ok(StorageDirective::Constant),
            StorageMode::Internal => Ok(StorageDirective::Inline),
            StorageMode::External => {
                let unit = layer.locator().and_then(|l| l.unit)
                    .ok_or_else(|| AError::MissingUnit { name: name.to_string() })?;
                Ok(StorageDirective::Unit(unit))
            },
            StorageMode::OpenClose => {
                let path = layer.locator().and_then(|l| l.path.clone())
                    .ok_or_else(|| AError::header(name, "OPEN/CLOSE storage without a file name"))?;
                Ok(StorageDirective::File(path))
            }
        }
    }

    /// The path of the file behind a directive (`None` for constant and inline data).
    pub fn resolve_path(&self, directive: &StorageDirective) -> AResult<Option<PathBuf>> {
        match directive {
            StorageDirective::Constant | StorageDirective::Inline => Ok(None),
            StorageDirective::Unit(unit) => {
                let file = self.units.get(*unit).ok_or(AError::UnknownUnit(*unit))?;
                Ok(Some(self.workspace.join(&file.path)))
            },
            StorageDirective::File(path) => Ok(Some(self.workspace.join(path))),
        }
    }

    /// Check that a unit is used the way the name file declares it: binary data only on
    /// `DATA(BINARY)` units and text only on the others. Units missing from the table
    /// are not checked here.
    pub fn check_unit_kind(&self, directive: &StorageDirective, binary: bool) -> AResult<()> {
        let StorageDirective::Unit(unit) = directive else {
            return Ok(())
        };
        match self.units.get(*unit) {
            Some(file) if file.binary != binary => {
                let used = if binary { "binary" } else { "text" };
                Err(AError::header(format!("unit {unit}"), format!("{used} data on a unit declared {}", file.ftype)))
            },
            _ => Ok(()),
        }
    }

    /// Open the file behind `directive` at the position the next read should start.
    /// Returns the reader and that byte offset.
    pub fn open_for_read(&self, directive: &StorageDirective) -> AResult<(BufReader<File>, u64)> {
        let path = self.resolve_path(directive)?
            .ok_or_else(|| AError::header(format!("{directive:?}"), "no file to open"))?;
        let offset = match directive {
            StorageDirective::Unit(unit) => self.read_pos.get(unit).copied().unwrap_or(0),
            _ => 0,
        };

        debug!("reading array data from {} at byte {offset}", path.display());
        let mut file = File::open(&path).map_err(AError::ReadError)?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).map_err(AError::ReadError)?;
        }
        Ok((BufReader::new(file), offset))
    }

    /// Record that a read from `directive` ended at `end`.
    pub fn finish_read(&mut self, directive: &StorageDirective, end: u64) {
        if let StorageDirective::Unit(unit) = directive {
            self.read_pos.insert(*unit, end);
        }
    }

    /// Open the file behind `directive` for writing. The first write to a unit (and
    /// every write to an OPEN/CLOSE file) truncates the file; later writes to the
    /// same unit append. Returns the writer and the starting byte offset.
    pub fn open_for_write(&mut self, directive: &StorageDirective) -> AResult<(BufWriter<File>, u64)> {
        let path = self.resolve_path(directive)?
            .ok_or_else(|| AError::header(format!("{directive:?}"), "no file to open"))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(AError::WriteError)?;
        }

        let offset = match directive {
            StorageDirective::Unit(unit) => self.write_pos.get(unit).copied(),
            _ => None,
        };

        debug!("writing array data to {}", path.display());
        let file = match offset {
            Some(_) => OpenOptions::new().append(true).open(&path),
            None => File::create(&path),
        }.map_err(AError::WriteError)?;
        Ok((BufWriter::new(file), offset.unwrap_or(0)))
    }

    /// Record that a write to `directive` ended at `end`.
    pub fn finish_write(&mut self, directive: &StorageDirective, end: u64) {
        if let StorageDirective::Unit(unit) = directive {
            self.write_pos.insert(*unit, end);
        }
    }

    /// Forget all read and write positions, e.g. before reading a model that was just written.
    pub fn rewind(&mut self) {
        self.read_pos.clear();
        self.write_pos.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stringreader::StringReader;

    #[test]
    fn test_name_file() -> AResult<()> {
        let text = "# name file\nLIST 2 model.list\nBAS6 1 model.ba6\n\nDATA 50 arrays/hk.dat\nDATA(BINARY) 51 'arrays/strt.bin' REPLACE\n";
        let table = UnitTable::parse_name_file(BufReader::new(StringReader::new(text)))?;
        assert_eq!(table.len(), 4);
        let hk = table.get(50).unwrap();
        assert_eq!(hk.path, PathBuf::from("arrays/hk.dat"));
        assert!(!hk.binary);
        let strt = table.get(51).unwrap();
        assert!(strt.binary);
        assert_eq!(strt.path, PathBuf::from("arrays/strt.bin"));
        assert_eq!(table.iter().map(|f| f.unit).collect::<Vec<_>>(), vec![2, 1, 50, 51]);
        Ok(())
    }

    #[test]
    fn test_bad_name_file() {
        let res = UnitTable::parse_name_file(BufReader::new(StringReader::new("DATA fifty hk.dat\n")));
        assert!(res.is_err());
        let res = UnitTable::parse_name_file(BufReader::new(StringReader::new("DATA 50\n")));
        assert!(res.is_err());
    }

    #[test]
    fn test_name_file_round_trip() -> AResult<()> {
        let table = UnitTable::new()
            .with_file(ExternalFile::new(50, "hk.dat", false))
            .with_file(ExternalFile::new(51, "strt.bin", true));
        let text = table.to_name_file();
        let back = UnitTable::parse_name_file(BufReader::new(StringReader::new(&text)))?;
        assert_eq!(back, table);
        Ok(())
    }

    #[test]
    fn test_classify_locat() {
        assert_eq!(classify_locat(0, Some(11)).mode, StorageMode::Constant);
        assert_eq!(classify_locat(11, Some(11)).mode, StorageMode::Internal);
        let ext = classify_locat(50, Some(11));
        assert_eq!((ext.mode, ext.unit, ext.binary), (StorageMode::External, Some(50), false));
        let bin = classify_locat(-51, Some(11));
        assert_eq!((bin.mode, bin.unit, bin.binary), (StorageMode::External, Some(51), true));
        assert_eq!(classify_locat(11, None).mode, StorageMode::External);
    }

    #[test]
    fn test_directives() -> AResult<()> {
        let resolver = StorageResolver::new("/model")
            .with_units(UnitTable::new().with_file(ExternalFile::new(50, "hk.dat", false)));

        let mut layer = Layer::constant(1.0_f64);
        assert_eq!(resolver.directive_for("hk", &layer)?, StorageDirective::Constant);
        layer.set_external(50);
        let d = resolver.directive_for("hk", &layer)?;
        assert_eq!(d, StorageDirective::Unit(50));
        assert_eq!(resolver.resolve_path(&d)?, Some(PathBuf::from("/model/hk.dat")));

        layer.set_external(60);
        let d = resolver.directive_for("hk", &layer)?;
        assert!(matches!(resolver.resolve_path(&d), Err(AError::UnknownUnit(60))));

        layer.set_open_close("sub/hk.ref");
        let d = resolver.directive_for("hk", &layer)?;
        assert_eq!(resolver.resolve_path(&d)?, Some(PathBuf::from("/model/sub/hk.ref")));

        layer.set_internal();
        assert_eq!(resolver.directive_for("hk", &layer)?, StorageDirective::Inline);
        Ok(())
    }

    #[test]
    fn test_unit_kind() -> AResult<()> {
        let units = UnitTable::new()
            .with_file(ExternalFile::new(50, "hk.dat", false))
            .with_file(ExternalFile::new(51, "strt.bin", true));
        let resolver = StorageResolver::new("/model").with_units(units);

        resolver.check_unit_kind(&StorageDirective::Unit(50), false)?;
        resolver.check_unit_kind(&StorageDirective::Unit(51), true)?;
        resolver.check_unit_kind(&StorageDirective::Unit(60), true)?;
        resolver.check_unit_kind(&StorageDirective::File("strt.bin".into()), true)?;

        let res = resolver.check_unit_kind(&StorageDirective::Unit(50), true);
        assert!(matches!(&res, Err(AError::InvalidHeader { reason, .. }) if reason == "binary data on a unit declared DATA"), "got {res:?}");
        let res = resolver.check_unit_kind(&StorageDirective::Unit(51), false);
        assert!(matches!(&res, Err(AError::InvalidHeader { reason, .. }) if reason.contains("DATA(BINARY)")), "got {res:?}");
        Ok(())
    }
}
