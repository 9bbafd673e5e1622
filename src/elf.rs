use bitflags::bitflags;

use crate::macros::define_infallible_enum;
use crate::read::bytes_at;
use crate::read::get_string;
use crate::read::read_u16;
use crate::read::read_u32;
use crate::Error;
use crate::Result;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const CLASS_32: u8 = 1;
const DATA_LITTLE_ENDIAN: u8 = 1;
const SECTION_HEADER_LEN: u64 = 0x28;
const PROGRAM_HEADER_LEN: u64 = 0x20;

define_infallible_enum! {
    "Section type.",
    SectionKind,
    u32,
    (Null, 0x0),
    (ProgBits, 0x1),
    (SymTab, 0x2),
    (StrTab, 0x3),
    (Rela, 0x4),
    (Hash, 0x5),
    (Dynamic, 0x6),
    (Note, 0x7),
    (NoBits, 0x8),
    (Rel, 0x9),
    (ShLib, 0xa),
    (DynSym, 0xb),
    (InitArray, 0xe),
    (FiniArray, 0xf),
    (PreInitArray, 0x10),
    (Group, 0x11),
    (SymTabShndx, 0x12),
    (MipsDebug, 0x70000005, "A .mdebug symbol table."),
}

/// A section from the section header table, with its name resolved.
#[derive(Debug, Clone)]
pub struct ElfSection {
    pub name: String,
    pub kind: SectionKind,
    pub flags: u32,
    pub virtual_address: Option<u32>,
    pub offset: u32,
    pub size: u32,
    pub link: u32,
}

/// A loadable segment from the program header table.
#[derive(Debug, Clone)]
pub struct ElfSegment {
    pub kind: u32,
    pub offset: u32,
    pub virtual_address: Option<u32>,
    pub file_size: u32,
    pub memory_size: u32,
}

/// A 32-bit little-endian ELF image.
///
/// Only the pieces the symbol table importers need are parsed: the section
/// header table with resolved names, and the program headers. Relocations,
/// dynamic linking information and the like are left alone.
#[derive(Debug)]
pub struct ElfFile {
    image: Vec<u8>,
    pub entry_point: u32,
    pub sections: Vec<ElfSection>,
    pub segments: Vec<ElfSegment>,
}

impl ElfFile {
    pub fn parse(image: Vec<u8>) -> Result<Self> {
        let ident = bytes_at(&image, 0, 16, "ELF identifier")?;
        if ident[0..4] != ELF_MAGIC {
            return Err(Error::NotElf);
        }
        if ident[4] != CLASS_32 {
            return Err(Error::InvalidClass(ident[4]));
        }
        if ident[5] != DATA_LITTLE_ENDIAN {
            return Err(Error::InvalidByteOrder(ident[5]));
        }

        let entry_point = read_u32(&image, 0x18, "ELF header")?;
        let program_header_offset = read_u32(&image, 0x1c, "ELF header")? as u64;
        let section_header_offset = read_u32(&image, 0x20, "ELF header")? as u64;
        let segment_count = read_u16(&image, 0x2c, "ELF header")? as u64;
        let section_count = read_u16(&image, 0x30, "ELF header")? as u64;
        let section_names_index = read_u16(&image, 0x32, "ELF header")? as u64;

        let mut sections = Vec::with_capacity(section_count as usize);
        for i in 0..section_count {
            let offset = section_header_offset + i * SECTION_HEADER_LEN;
            sections.push(RawSection::read(&image, offset)?);
        }

        let mut segments = Vec::with_capacity(segment_count as usize);
        for i in 0..segment_count {
            let offset = program_header_offset + i * PROGRAM_HEADER_LEN;
            segments.push(ElfSegment::read(&image, offset)?);
        }

        // Resolve section names through the section name string table.
        let names_offset = sections
            .get(section_names_index as usize)
            .map(|section| section.offset as u64);
        let sections = sections
            .into_iter()
            .map(|raw| {
                let name = match names_offset {
                    Some(base) => {
                        get_string(&image, base + raw.name_offset as u64, "section name")
                            .unwrap_or_default()
                    }
                    None => String::new(),
                };
                ElfSection {
                    name,
                    kind: raw.kind,
                    flags: raw.flags,
                    virtual_address: (raw.virtual_address != 0).then_some(raw.virtual_address),
                    offset: raw.offset,
                    size: raw.size,
                    link: raw.link,
                }
            })
            .collect();

        Ok(Self {
            image,
            entry_point,
            sections,
            segments,
        })
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn section_by_name(&self, name: &str) -> Option<&ElfSection> {
        self.sections.iter().find(|section| section.name == name)
    }

    /// Find the .mdebug section, by name or failing that by section type.
    pub fn mdebug_section(&self) -> Option<&ElfSection> {
        self.section_by_name(".mdebug").or_else(|| {
            self.sections
                .iter()
                .find(|section| section.kind == SectionKind::MipsDebug)
        })
    }
}

struct RawSection {
    name_offset: u32,
    kind: SectionKind,
    flags: u32,
    virtual_address: u32,
    offset: u32,
    size: u32,
    link: u32,
}

impl RawSection {
    fn read(image: &[u8], offset: u64) -> Result<Self> {
        let name_offset = read_u32(image, offset, "section header")?;
        let kind = read_u32(image, offset + 0x4, "section header")?.into();
        let flags = read_u32(image, offset + 0x8, "section header")?;
        let virtual_address = read_u32(image, offset + 0xc, "section header")?;
        let file_offset = read_u32(image, offset + 0x10, "section header")?;
        let size = read_u32(image, offset + 0x14, "section header")?;
        let link = read_u32(image, offset + 0x18, "section header")?;
        Ok(Self {
            name_offset,
            kind,
            flags,
            virtual_address,
            offset: file_offset,
            size,
            link,
        })
    }
}

impl ElfSegment {
    fn read(image: &[u8], offset: u64) -> Result<Self> {
        let kind = read_u32(image, offset, "program header")?;
        let file_offset = read_u32(image, offset + 0x4, "program header")?;
        let virtual_address = read_u32(image, offset + 0x8, "program header")?;
        let file_size = read_u32(image, offset + 0x10, "program header")?;
        let memory_size = read_u32(image, offset + 0x14, "program header")?;
        Ok(Self {
            kind,
            offset: file_offset,
            virtual_address: (virtual_address != 0).then_some(virtual_address),
            file_size,
            memory_size,
        })
    }
}

bitflags! {
    /// Which symbol table formats are present in an ELF file.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct SymbolTableFormats: u32 {
        /// Standard ELF symbol table.
        const SYMTAB = 1 << 0;
        /// The infamous Third Eye symbol table.
        const MDEBUG = 1 << 1;
        /// Simpler container format for STABS symbols.
        const STAB = 1 << 2;
        /// DWARF 1 symbol table.
        const DWARF = 1 << 3;
        /// SNDLL linker symbols.
        const SNDATA = 1 << 4;
    }
}

/// Determine which symbol tables are present in a given file.
pub fn identify_symbol_tables(elf: &ElfFile) -> SymbolTableFormats {
    let mut formats = SymbolTableFormats::empty();
    for section in &elf.sections {
        match section.name.as_str() {
            ".symtab" => formats |= SymbolTableFormats::SYMTAB,
            ".mdebug" => formats |= SymbolTableFormats::MDEBUG,
            ".stab" => formats |= SymbolTableFormats::STAB,
            ".debug" => formats |= SymbolTableFormats::DWARF,
            ".sndata" => formats |= SymbolTableFormats::SNDATA,
            _ => {
                if section.kind == SectionKind::MipsDebug {
                    formats |= SymbolTableFormats::MDEBUG;
                }
            }
        }
    }
    formats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_elf() -> Vec<u8> {
        // Header, one NULL section, one named section and a string table.
        let mut image = vec![0_u8; 0x34];
        image[0..4].copy_from_slice(&ELF_MAGIC);
        image[4] = CLASS_32;
        image[5] = DATA_LITTLE_ENDIAN;
        let section_header_offset = 0x100_u32;
        image[0x20..0x24].copy_from_slice(&section_header_offset.to_le_bytes());
        image[0x30..0x32].copy_from_slice(&3_u16.to_le_bytes()); // section count
        image[0x32..0x34].copy_from_slice(&2_u16.to_le_bytes()); // shstrndx
        image.resize(0x100 + 3 * 0x28, 0);

        // Section 1: .mdebug at 0x200.
        let s1 = 0x100 + 0x28;
        image[s1..s1 + 4].copy_from_slice(&1_u32.to_le_bytes()); // name offset
        image[s1 + 4..s1 + 8].copy_from_slice(&0x70000005_u32.to_le_bytes());
        image[s1 + 0x10..s1 + 0x14].copy_from_slice(&0x200_u32.to_le_bytes());

        // Section 2: .shstrtab.
        let s2 = 0x100 + 2 * 0x28;
        image[s2 + 4..s2 + 8].copy_from_slice(&3_u32.to_le_bytes());
        let strings_offset = image.len() as u32;
        image[s2 + 0x10..s2 + 0x14].copy_from_slice(&strings_offset.to_le_bytes());
        image.extend_from_slice(b"\0.mdebug\0");
        image
    }

    #[test]
    fn parse_minimal() {
        let elf = ElfFile::parse(minimal_elf()).unwrap();
        assert_eq!(3, elf.sections.len());
        let mdebug = elf.mdebug_section().unwrap();
        assert_eq!(".mdebug", mdebug.name);
        assert_eq!(0x200, mdebug.offset);
        assert_eq!(
            SymbolTableFormats::MDEBUG,
            identify_symbol_tables(&elf) & SymbolTableFormats::MDEBUG
        );
    }

    #[test]
    fn reject_non_elf() {
        assert!(matches!(
            ElfFile::parse(b"MZ\x90\x00".to_vec()),
            Err(Error::NotElf)
        ));
        let mut bad_class = minimal_elf();
        bad_class[4] = 2;
        assert!(matches!(
            ElfFile::parse(bad_class),
            Err(Error::InvalidClass(2))
        ));
    }
}
