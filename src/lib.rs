#![doc = include_str!("../README.md")]

mod analysis;
mod ast;
mod database;
mod elf;
mod error;
mod flags;
mod importer;
pub(crate) mod macros;
mod mdebug;
mod read;
mod stabs;
mod stabs_to_ast;
mod symbols;

pub use self::analysis::*;
pub use self::ast::*;
pub use self::database::*;
pub use self::elf::*;
pub use self::error::*;
pub use self::flags::*;
pub use self::importer::*;
pub use self::stabs::*;
pub use self::stabs_to_ast::*;
pub use self::symbols::*;

/// The raw .mdebug container format.
pub mod mdebug_section {
    pub use crate::mdebug::*;
}

pub use self::mdebug::stabs_code_to_string;
pub use self::mdebug::SourceLanguage;
pub use self::mdebug::StabsCode;
pub use self::mdebug::SymbolClass;
pub use self::mdebug::SymbolTableReader;
pub use self::mdebug::SymbolType;
pub use self::mdebug::SymbolicHeader;
pub use self::mdebug::MDEBUG_MAGIC;
