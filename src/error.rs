use thiserror::Error;

/// Everything that can go wrong while reading a symbol table.
///
/// Malformed debug sections are the norm rather than the exception, so most
/// variants carry enough context to identify the offending record.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not an ELF file")]
    NotElf,
    #[error("Invalid ELF class: {0}")]
    InvalidClass(u8),
    #[error("Invalid byte order: {0}")]
    InvalidByteOrder(u8),
    #[error("No .mdebug section present")]
    NoMdebugSection,
    #[error("Invalid symbolic header magic: {0:#x}")]
    InvalidMagic(u16),
    #[error("Big endian file descriptor")]
    BigEndianFileDescriptor,
    #[error("Unknown STABS code: {0:#x}")]
    UnknownStabsCode(u32),
    #[error("Unhandled N_{0} symbol: {1}")]
    UnhandledStabsSymbol(&'static str, String),
    #[error("Out-of-range read of {1:#x}..{2:#x} for {0}")]
    OutOfRange(&'static str, u64, u64),
    #[error("Unterminated string for {0} at {1:#x}")]
    UnterminatedString(&'static str, u64),
    #[error("Unexpected end of input while parsing {0}")]
    UnexpectedEof(&'static str),
    #[error("Expected '{expected}' in {subject}, got '{got}'")]
    ExpectedChar {
        expected: char,
        got: char,
        subject: &'static str,
    },
    #[error("Cannot parse {0}")]
    CannotParse(&'static str),
    #[error("Invalid type descriptor '{0}'")]
    InvalidTypeDescriptor(char),
    #[error("Invalid cross reference type '{0}'")]
    InvalidCrossReferenceType(char),
    #[error("Invalid field visibility '{0}'")]
    InvalidFieldVisibility(char),
    #[error("Invalid member function modifiers '{0}'")]
    InvalidMemberFunctionModifiers(char),
    #[error("Invalid member function type '{0}'")]
    InvalidMemberFunctionType(char),
    #[error("Weird value following '@' type descriptor")]
    InvalidTypeAttribute,
    #[error("Unknown symbol descriptor '{0}'")]
    UnknownSymbolDescriptor(char),
    #[error("Invalid STABS continuation")]
    InvalidStabsContinuation,
    #[error("Failed to lookup STABS type by its type number ({0},{1})")]
    UnresolvedTypeNumber(i32, i32),
    #[error("Cannot lookup type (type is anonymous)")]
    AnonymousTypeLookup,
    #[error("Failed to classify range {{{0};{1}}}")]
    UnclassifiableRange(String, String),
    #[error("Invalid index type for array")]
    InvalidArrayIndex,
    #[error("Unknown built-in type {0}")]
    UnknownBuiltIn(i64),
    #[error("Call depth greater than {0} while converting STABS type, probably infinite recursion")]
    MaxDepthExceeded(u32),
    #[error("{0} symbol before first procedure symbol")]
    SymbolBeforeProcedure(&'static str),
    #[error("N_RBRAC symbol without a matching N_LBRAC symbol")]
    UnmatchedBlockEnd,
    #[error("Unexpected end of symbol table for '{0}'")]
    UnexpectedEndOfSymbolTable(String),
    #[error("Invalid global variable location {0}")]
    InvalidVariableLocation(u32),
    #[error("Label address too big: {0:#x}")]
    LabelAddressTooBig(u32),
    #[error("Ran out of {0} symbol handles")]
    HandleOverflow(&'static str),
    #[error("Symbol table import was interrupted")]
    Interrupted,
}

pub type Result<T> = core::result::Result<T, Error>;
