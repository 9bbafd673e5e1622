use crate::macros::define_infallible_enum;
use crate::read::get_string;
use crate::read::read_i32;
use crate::read::read_u16;
use crate::read::read_u32;
use crate::Error;
use crate::Result;

pub const MDEBUG_MAGIC: u16 = 0x7009;

const FILE_DESCRIPTOR_SIZE: u64 = 0x48;
const SYMBOL_SIZE: u64 = 0xc;
const EXTERNAL_SYMBOL_SIZE: u64 = 0x10;

/// If these bits are set in a symbol's index field, the symbol is a stab and
/// the low byte selects the kind.
const STABS_CODE_MASK: u32 = 0xfff00;
const STABS_CODE_MAGIC: u32 = 0x8f300;

define_infallible_enum! {
    "Storage type of a local or external symbol.",
    SymbolType,
    u32,
    (Nil, 0),
    (Global, 1),
    (Static, 2),
    (Param, 3),
    (Local, 4),
    (Label, 5),
    (Proc, 6),
    (Block, 7),
    (End, 8),
    (Member, 9),
    (Typedef, 10),
    (File, 11),
    (StaticProc, 14),
    (Constant, 15),
}

define_infallible_enum! {
    "Storage class of a local or external symbol.",
    SymbolClass,
    u32,
    (Nil, 0),
    (Text, 1),
    (Data, 2),
    (Bss, 3),
    (Register, 4),
    (Abs, 5),
    (Undefined, 6),
    (Local, 7),
    (Bits, 8),
    (Dbx, 9),
    (RegImage, 10),
    (Info, 11),
    (UserStruct, 12),
    (Sdata, 13),
    (Sbss, 14),
    (Rdata, 15),
    (Var, 16),
    (Common, 17),
    (Scommon, 18),
    (VarRegister, 19),
    (Variant, 20),
    (Sundefined, 21),
    (Init, 22),
    (BasedVar, 23),
    (Xdata, 24),
    (Pdata, 25),
    (Fini, 26),
    (NonGp, 27),
}

define_infallible_enum! {
    "The subset of the STABS codes that appears in .mdebug sections.",
    StabsCode,
    u32,
    (Stab, 0x00),
    (Gsym, 0x20),
    (Fname, 0x22),
    (Fun, 0x24),
    (Stsym, 0x26),
    (Lcsym, 0x28),
    (Main, 0x2a),
    (Pc, 0x30),
    (Nsyms, 0x32),
    (Nomap, 0x34),
    (Obj, 0x38),
    (Opt, 0x3c),
    (Rsym, 0x40),
    (M2c, 0x42),
    (Sline, 0x44),
    (Dsline, 0x46),
    (Bsline, 0x48),
    (Efd, 0x4a),
    (Ehdecl, 0x50),
    (Catch, 0x54),
    (Ssym, 0x60),
    (So, 0x64),
    (Lsym, 0x80),
    (Bincl, 0x82),
    (Sol, 0x84),
    (Psym, 0xa0),
    (Eincl, 0xa2),
    (Entry, 0xa4),
    (Lbrac, 0xc0),
    (Excl, 0xc2),
    (Scope, 0xc4),
    (Rbrac, 0xe0),
    (Bcomm, 0xe2),
    (Ecomm, 0xe4),
    (Ecoml, 0xe8),
    (Nbtext, 0xf0),
    (Nbdata, 0xf2),
    (Nbbss, 0xf4),
    (Nbsts, 0xf6),
    (Nblcs, 0xf8),
    (Leng, 0xfe),
}

pub fn stabs_code_to_string(code: StabsCode) -> &'static str {
    match code {
        StabsCode::Stab => "STAB",
        StabsCode::Gsym => "GSYM",
        StabsCode::Fname => "FNAME",
        StabsCode::Fun => "FUN",
        StabsCode::Stsym => "STSYM",
        StabsCode::Lcsym => "LCSYM",
        StabsCode::Main => "MAIN",
        StabsCode::Pc => "PC",
        StabsCode::Nsyms => "NSYMS",
        StabsCode::Nomap => "NOMAP",
        StabsCode::Obj => "OBJ",
        StabsCode::Opt => "OPT",
        StabsCode::Rsym => "RSYM",
        StabsCode::M2c => "M2C",
        StabsCode::Sline => "SLINE",
        StabsCode::Dsline => "DSLINE",
        StabsCode::Bsline => "BSLINE",
        StabsCode::Efd => "EFD",
        StabsCode::Ehdecl => "EHDECL",
        StabsCode::Catch => "CATCH",
        StabsCode::Ssym => "SSYM",
        StabsCode::So => "SO",
        StabsCode::Lsym => "LSYM",
        StabsCode::Bincl => "BINCL",
        StabsCode::Sol => "SOL",
        StabsCode::Psym => "PSYM",
        StabsCode::Eincl => "EINCL",
        StabsCode::Entry => "ENTRY",
        StabsCode::Lbrac => "LBRAC",
        StabsCode::Excl => "EXCL",
        StabsCode::Scope => "SCOPE",
        StabsCode::Rbrac => "RBRAC",
        StabsCode::Bcomm => "BCOMM",
        StabsCode::Ecomm => "ECOMM",
        StabsCode::Ecoml => "ECOML",
        StabsCode::Nbtext => "NBTEXT",
        StabsCode::Nbdata => "NBDATA",
        StabsCode::Nbbss => "NBBSS",
        StabsCode::Nbsts => "NBSTS",
        StabsCode::Nblcs => "NBLCS",
        StabsCode::Leng => "LENG",
        StabsCode::Other(_) => "UNKNOWN",
    }
}

define_infallible_enum! {
    "The source language of a translation unit, guessed from its file name.",
    SourceLanguage,
    u32,
    (C, 0),
    (Cpp, 1),
    (Assembly, 2),
    (Unknown, 3),
}

/// The symbolic header at the start of a .mdebug section. All offsets are
/// relative to the start of the file, not the section.
#[derive(Debug, Clone)]
pub struct SymbolicHeader {
    pub magic: u16,
    pub version_stamp: u16,
    pub line_number_count: i32,
    pub line_numbers_size_bytes: i32,
    pub line_numbers_offset: i32,
    pub dense_numbers_count: i32,
    pub dense_numbers_offset: i32,
    pub procedure_descriptor_count: i32,
    pub procedure_descriptors_offset: i32,
    pub local_symbol_count: i32,
    pub local_symbols_offset: i32,
    pub optimization_symbols_count: i32,
    pub optimization_symbols_offset: i32,
    pub auxiliary_symbol_count: i32,
    pub auxiliary_symbols_offset: i32,
    pub local_strings_size_bytes: i32,
    pub local_strings_offset: i32,
    pub external_strings_size_bytes: i32,
    pub external_strings_offset: i32,
    pub file_descriptor_count: i32,
    pub file_descriptors_offset: i32,
    pub relative_file_descriptor_count: i32,
    pub relative_file_descriptors_offset: i32,
    pub external_symbols_count: i32,
    pub external_symbols_offset: i32,
}

impl SymbolicHeader {
    fn read(image: &[u8], offset: u64) -> Result<Self> {
        const SUBJECT: &str = "symbolic header";
        Ok(Self {
            magic: read_u16(image, offset, SUBJECT)?,
            version_stamp: read_u16(image, offset + 0x02, SUBJECT)?,
            line_number_count: read_i32(image, offset + 0x04, SUBJECT)?,
            line_numbers_size_bytes: read_i32(image, offset + 0x08, SUBJECT)?,
            line_numbers_offset: read_i32(image, offset + 0x0c, SUBJECT)?,
            dense_numbers_count: read_i32(image, offset + 0x10, SUBJECT)?,
            dense_numbers_offset: read_i32(image, offset + 0x14, SUBJECT)?,
            procedure_descriptor_count: read_i32(image, offset + 0x18, SUBJECT)?,
            procedure_descriptors_offset: read_i32(image, offset + 0x1c, SUBJECT)?,
            local_symbol_count: read_i32(image, offset + 0x20, SUBJECT)?,
            local_symbols_offset: read_i32(image, offset + 0x24, SUBJECT)?,
            optimization_symbols_count: read_i32(image, offset + 0x28, SUBJECT)?,
            optimization_symbols_offset: read_i32(image, offset + 0x2c, SUBJECT)?,
            auxiliary_symbol_count: read_i32(image, offset + 0x30, SUBJECT)?,
            auxiliary_symbols_offset: read_i32(image, offset + 0x34, SUBJECT)?,
            local_strings_size_bytes: read_i32(image, offset + 0x38, SUBJECT)?,
            local_strings_offset: read_i32(image, offset + 0x3c, SUBJECT)?,
            external_strings_size_bytes: read_i32(image, offset + 0x40, SUBJECT)?,
            external_strings_offset: read_i32(image, offset + 0x44, SUBJECT)?,
            file_descriptor_count: read_i32(image, offset + 0x48, SUBJECT)?,
            file_descriptors_offset: read_i32(image, offset + 0x4c, SUBJECT)?,
            relative_file_descriptor_count: read_i32(image, offset + 0x50, SUBJECT)?,
            relative_file_descriptors_offset: read_i32(image, offset + 0x54, SUBJECT)?,
            external_symbols_count: read_i32(image, offset + 0x58, SUBJECT)?,
            external_symbols_offset: read_i32(image, offset + 0x5c, SUBJECT)?,
        })
    }
}

#[derive(Debug, Clone)]
struct FileDescriptor {
    address: u32,
    file_path_string_offset: i32,
    strings_offset: i32,
    isym_base: i32,
    symbol_count: i32,
    big_endian: bool,
}

impl FileDescriptor {
    fn read(image: &[u8], offset: u64) -> Result<Self> {
        const SUBJECT: &str = "file descriptor";
        let address = read_u32(image, offset, SUBJECT)?;
        let file_path_string_offset = read_i32(image, offset + 0x04, SUBJECT)?;
        let strings_offset = read_i32(image, offset + 0x08, SUBJECT)?;
        let isym_base = read_i32(image, offset + 0x10, SUBJECT)?;
        let symbol_count = read_i32(image, offset + 0x14, SUBJECT)?;
        let bits = read_u32(image, offset + 0x3c, SUBJECT)?;
        Ok(Self {
            address,
            file_path_string_offset,
            strings_offset,
            isym_base,
            symbol_count,
            big_endian: (bits >> 7) & 1 != 0,
        })
    }
}

/// A local or external symbol record.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub string: String,
    pub value: i32,
    pub symbol_type: SymbolType,
    pub symbol_class: SymbolClass,
    pub index: u32,
    pub stab_code: Option<StabsCode>,
}

impl Symbol {
    fn parse(image: &[u8], offset: u64, strings_offset: u64) -> Result<Self> {
        const SUBJECT: &str = "symbol";
        let iss = read_u32(image, offset, SUBJECT)?;
        let value = read_i32(image, offset + 0x4, SUBJECT)?;
        let bits = read_u32(image, offset + 0x8, SUBJECT)?;
        let symbol_type = SymbolType::from(bits & 0x3f);
        let symbol_class = SymbolClass::from((bits >> 6) & 0x1f);
        let index = bits >> 12;

        let string = get_string(image, strings_offset + iss as u64, "symbol string")?;

        let stab_code = if index & STABS_CODE_MASK == STABS_CODE_MAGIC {
            let code = StabsCode::from(index - STABS_CODE_MAGIC);
            if let StabsCode::Other(raw) = code {
                return Err(Error::UnknownStabsCode(raw));
            }
            Some(code)
        } else {
            None
        };

        Ok(Self {
            string,
            value,
            symbol_type,
            symbol_class,
            index,
            stab_code,
        })
    }

    /// Build a stab record. Mostly useful for constructing synthetic symbol
    /// tables in tests.
    pub fn stabs(
        code: StabsCode,
        symbol_type: SymbolType,
        symbol_class: SymbolClass,
        value: i32,
        string: impl Into<String>,
    ) -> Self {
        Self {
            string: string.into(),
            value,
            symbol_type,
            symbol_class,
            index: code.as_number() + STABS_CODE_MAGIC,
            stab_code: Some(code),
        }
    }

    /// Build a non-stabs record. For text labels the index field carries the
    /// line number.
    pub fn non_stabs(
        symbol_type: SymbolType,
        symbol_class: SymbolClass,
        index: u32,
        value: i32,
        string: impl Into<String>,
    ) -> Self {
        Self {
            string: string.into(),
            value,
            symbol_type,
            symbol_class,
            index,
            stab_code: None,
        }
    }

    pub fn is_stabs(&self) -> bool {
        self.stab_code.is_some()
    }
}

/// The symbols of one translation unit, plus everything that was recovered
/// about where it came from.
#[derive(Debug, Clone, Default)]
pub struct File {
    pub raw_path: String,
    pub full_path: String,
    pub working_dir: String,
    pub command_line_path: String,
    pub detected_language: Option<SourceLanguage>,
    pub text_address: u32,
    pub symbols: Vec<Symbol>,
}

impl File {
    pub fn with_symbols(symbols: Vec<Symbol>) -> Self {
        Self {
            symbols,
            ..Self::default()
        }
    }
}

/// Reads the .mdebug symbol table embedded in an executable.
pub struct SymbolTableReader<'a> {
    image: &'a [u8],
    header: SymbolicHeader,
}

impl<'a> SymbolTableReader<'a> {
    pub fn new(image: &'a [u8], section_offset: u64) -> Result<Self> {
        let header = SymbolicHeader::read(image, section_offset)?;
        if header.magic != MDEBUG_MAGIC {
            return Err(Error::InvalidMagic(header.magic));
        }
        Ok(Self { image, header })
    }

    pub fn header(&self) -> &SymbolicHeader {
        &self.header
    }

    pub fn file_count(&self) -> i32 {
        self.header.file_descriptor_count
    }

    /// Parse the symbols of the file descriptor at `index`.
    pub fn parse_file(&self, index: i32) -> Result<File> {
        if index < 0 || index >= self.header.file_descriptor_count {
            return Err(Error::OutOfRange(
                "file descriptor index",
                index as u64,
                self.header.file_descriptor_count as u64,
            ));
        }

        let descriptor_offset = self.header.file_descriptors_offset as u64
            + index as u64 * FILE_DESCRIPTOR_SIZE;
        let descriptor = FileDescriptor::read(self.image, descriptor_offset)?;
        if descriptor.big_endian {
            return Err(Error::BigEndianFileDescriptor);
        }

        let strings_offset =
            self.header.local_strings_offset as i64 + descriptor.strings_offset as i64;
        let raw_path = get_string(
            self.image,
            (strings_offset + descriptor.file_path_string_offset as i64) as u64,
            "file path",
        )?;

        let mut file = File {
            detected_language: detect_language(&raw_path),
            text_address: descriptor.address,
            ..File::default()
        };

        for symbol_index in 0..descriptor.symbol_count.max(0) {
            let symbol_offset = self.header.local_symbols_offset as u64
                + (descriptor.isym_base as i64 + symbol_index as i64) as u64 * SYMBOL_SIZE;
            let iss = read_u32(self.image, symbol_offset, "symbol")?;
            let symbol = Symbol::parse(self.image, symbol_offset, strings_offset as u64)?;

            // Some compilers emit the working directory as a label right
            // before the label that repeats the file path.
            if file.working_dir.is_empty()
                && iss as i64 == descriptor.file_path_string_offset as i64
                && symbol.symbol_type == SymbolType::Label
                && file.symbols.len() >= 2
            {
                if let Some(previous) = file.symbols.last() {
                    if previous.symbol_type == SymbolType::Label {
                        file.working_dir = previous.string.clone();
                    }
                }
            }

            file.symbols.push(symbol);
        }

        file.command_line_path = raw_path.clone();
        file.raw_path = raw_path;
        file.full_path = canonicalize_path(&file.working_dir, &file.raw_path);

        Ok(file)
    }

    /// Parse the external symbol table. The addresses of global variables
    /// live here rather than in the per-file symbols.
    pub fn parse_external_symbols(&self) -> Result<Vec<Symbol>> {
        let mut externals = Vec::with_capacity(self.header.external_symbols_count.max(0) as usize);
        for index in 0..self.header.external_symbols_count.max(0) {
            let offset = self.header.external_symbols_offset as u64
                + index as u64 * EXTERNAL_SYMBOL_SIZE;
            let symbol = Symbol::parse(
                self.image,
                offset + 0x4,
                self.header.external_strings_offset as u64,
            )?;
            externals.push(symbol);
        }
        Ok(externals)
    }
}

fn detect_language(path: &str) -> Option<SourceLanguage> {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".c") {
        Some(SourceLanguage::C)
    } else if lower.ends_with(".cpp") || lower.ends_with(".cc") || lower.ends_with(".cxx") {
        Some(SourceLanguage::Cpp)
    } else if lower.ends_with(".s") || lower.ends_with(".asm") {
        Some(SourceLanguage::Assembly)
    } else {
        None
    }
}

/// Join and lexically normalize the working directory and the path passed on
/// the compiler command line. Absolute and drive-qualified paths are used
/// verbatim.
fn canonicalize_path(base_path: &str, raw_path: &str) -> String {
    let base_path = base_path.replace('\\', "/");
    let raw_path = raw_path.replace('\\', "/");
    let bytes = raw_path.as_bytes();
    let is_absolute =
        raw_path.starts_with('/') || (bytes.len() > 2 && bytes[1] == b':' && bytes[2] == b'/');
    if base_path.is_empty() || is_absolute {
        return raw_path;
    }
    weakly_canonicalize(&format!("{base_path}/{raw_path}"))
}

fn weakly_canonicalize(path: &str) -> String {
    let is_absolute = path.starts_with('/');
    let has_drive = {
        let bytes = path.as_bytes();
        bytes.len() > 2 && bytes[1] == b':' && bytes[2] == b'/'
    };
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..")
                    && !(has_drive && segments.len() == 1)
                {
                    segments.pop();
                } else if !is_absolute && !has_drive {
                    segments.push("..");
                }
            }
            segment => segments.push(segment),
        }
    }
    let joined = segments.join("/");
    if is_absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Build a tiny but structurally valid .mdebug image containing one file
    // with two symbols.
    fn synthetic_mdebug() -> Vec<u8> {
        let section_offset = 0x10_u64;
        let mut image = vec![0_u8; section_offset as usize + 0x60];

        let strings_offset = image.len() as u32;
        let mut strings = Vec::new();
        let path_offset = strings.len() as i32;
        strings.extend_from_slice(b"main.c\0");
        let int_offset = strings.len() as u32;
        strings.extend_from_slice(b"int:t(0,1)=r(0,1);-2147483648;2147483647;\0");
        image.extend_from_slice(&strings);

        let symbols_offset = image.len() as u32;
        // Symbol 0: N_LSYM stab for "int".
        image.extend_from_slice(&int_offset.to_le_bytes());
        image.extend_from_slice(&0_i32.to_le_bytes());
        let index = (StabsCode::Lsym.as_number() + STABS_CODE_MAGIC) << 12;
        image.extend_from_slice(&index.to_le_bytes());
        // Symbol 1: an END record.
        image.extend_from_slice(&0_u32.to_le_bytes());
        image.extend_from_slice(&0x20_i32.to_le_bytes());
        let bits = SymbolType::End.as_number() | (SymbolClass::Text.as_number() << 6) | (1 << 12);
        image.extend_from_slice(&bits.to_le_bytes());

        let descriptors_offset = image.len() as u32;
        let mut descriptor = vec![0_u8; FILE_DESCRIPTOR_SIZE as usize];
        descriptor[0x04..0x08].copy_from_slice(&path_offset.to_le_bytes());
        descriptor[0x14..0x18].copy_from_slice(&2_i32.to_le_bytes());
        image.extend_from_slice(&descriptor);

        // Fill in the symbolic header.
        let header = section_offset as usize;
        image[header..header + 2].copy_from_slice(&MDEBUG_MAGIC.to_le_bytes());
        image[header + 0x20..header + 0x24].copy_from_slice(&2_i32.to_le_bytes());
        image[header + 0x24..header + 0x28]
            .copy_from_slice(&(symbols_offset as i32).to_le_bytes());
        image[header + 0x3c..header + 0x40]
            .copy_from_slice(&(strings_offset as i32).to_le_bytes());
        image[header + 0x48..header + 0x4c].copy_from_slice(&1_i32.to_le_bytes());
        image[header + 0x4c..header + 0x50]
            .copy_from_slice(&(descriptors_offset as i32).to_le_bytes());
        image
    }

    #[test]
    fn parse_synthetic_symbol_table() {
        let image = synthetic_mdebug();
        let reader = SymbolTableReader::new(&image, 0x10).expect("reader");
        assert_eq!(1, reader.file_count());

        let file = reader.parse_file(0).expect("file");
        assert_eq!("main.c", file.full_path);
        assert_eq!(Some(SourceLanguage::C), file.detected_language);
        assert_eq!(2, file.symbols.len());

        let stab = &file.symbols[0];
        assert_eq!(Some(StabsCode::Lsym), stab.stab_code);
        assert!(stab.string.starts_with("int:t"));

        let end = &file.symbols[1];
        assert!(!end.is_stabs());
        assert_eq!(SymbolType::End, end.symbol_type);
        assert_eq!(SymbolClass::Text, end.symbol_class);
        assert_eq!(0x20, end.value);
    }

    #[test]
    fn reject_bad_magic() {
        let mut image = synthetic_mdebug();
        image[0x10] = 0x0a;
        assert!(matches!(
            SymbolTableReader::new(&image, 0x10),
            Err(Error::InvalidMagic(_))
        ));
    }

    #[test]
    fn truncated_header_is_an_error() {
        let image = vec![0_u8; 0x30];
        assert!(matches!(
            SymbolTableReader::new(&image, 0x10),
            Err(Error::OutOfRange(..))
        ));
    }

    #[test]
    fn path_canonicalization() {
        assert_eq!("src/main.c", canonicalize_path("src", "main.c"));
        assert_eq!(
            "/host/project/main.c",
            canonicalize_path("/host/project", "./main.c")
        );
        assert_eq!(
            "/host/main.c",
            canonicalize_path("/host/project", "../main.c")
        );
        assert_eq!("/abs/main.c", canonicalize_path("/ignored", "/abs/main.c"));
        assert_eq!(
            "C:/game/main.c",
            canonicalize_path("/ignored", "C:\\game\\main.c")
        );
        assert_eq!("main.c", canonicalize_path("", "main.c"));
    }
}
