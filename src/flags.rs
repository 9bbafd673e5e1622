use bitflags::bitflags;

bitflags! {
    /// Options that alter how a symbol table is imported.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct ImporterFlags: u32 {
        /// Do not deduplicate matching symbols from multiple symbol tables.
        const DONT_DEDUPLICATE_SYMBOLS = 1 << 0;
        /// Do not deduplicate matching data types from different translation
        /// units.
        const DONT_DEDUPLICATE_TYPES = 1 << 1;
        /// Do not demangle function and global variable names.
        const DONT_DEMANGLE_NAMES = 1 << 2;
        /// Include parameters in demangled function names.
        const DEMANGLE_PARAMETERS = 1 << 3;
        /// Include return types at the end of demangled function names.
        const DEMANGLE_RETURN_TYPE = 1 << 4;
        /// Include member functions that were likely generated by the
        /// compiler rather than written by hand.
        const INCLUDE_GENERATED_MEMBER_FUNCTIONS = 1 << 5;
        /// Treat all fields and member functions as public.
        const NO_ACCESS_SPECIFIERS = 1 << 6;
        /// Discard all member functions.
        const NO_MEMBER_FUNCTIONS = 1 << 7;
        /// Upgrade recoverable warnings to hard errors.
        const STRICT_PARSING = 1 << 8;
        /// Give all enums the typedef storage class.
        const TYPEDEF_ALL_ENUMS = 1 << 9;
        /// Give all structs the typedef storage class.
        const TYPEDEF_ALL_STRUCTS = 1 << 10;
        /// Give all unions the typedef storage class.
        const TYPEDEF_ALL_UNIONS = 1 << 11;
    }
}

/// Metadata for a single importer flag, used to generate command-line help.
pub struct ImporterFlagInfo {
    pub flag: ImporterFlags,
    pub argument: &'static str,
    pub help: &'static str,
}

pub const IMPORTER_FLAG_INFOS: &[ImporterFlagInfo] = &[
    ImporterFlagInfo {
        flag: ImporterFlags::DONT_DEDUPLICATE_SYMBOLS,
        argument: "--dont-deduplicate-symbols",
        help: "Do not deduplicate matching symbols from multiple symbol tables.",
    },
    ImporterFlagInfo {
        flag: ImporterFlags::DONT_DEDUPLICATE_TYPES,
        argument: "--dont-deduplicate-types",
        help: "Do not deduplicate matching data types from different translation units.",
    },
    ImporterFlagInfo {
        flag: ImporterFlags::DONT_DEMANGLE_NAMES,
        argument: "--dont-demangle-names",
        help: "Do not demangle function and global variable names.",
    },
    ImporterFlagInfo {
        flag: ImporterFlags::DEMANGLE_PARAMETERS,
        argument: "--demangle-parameters",
        help: "Include parameters in demangled function names.",
    },
    ImporterFlagInfo {
        flag: ImporterFlags::DEMANGLE_RETURN_TYPE,
        argument: "--demangle-return-type",
        help: "Include return types at the end of demangled function names.",
    },
    ImporterFlagInfo {
        flag: ImporterFlags::INCLUDE_GENERATED_MEMBER_FUNCTIONS,
        argument: "--include-generated-member-functions",
        help: "Include member functions that were likely generated by the compiler.",
    },
    ImporterFlagInfo {
        flag: ImporterFlags::NO_ACCESS_SPECIFIERS,
        argument: "--no-access-specifiers",
        help: "Treat all fields and member functions as public.",
    },
    ImporterFlagInfo {
        flag: ImporterFlags::NO_MEMBER_FUNCTIONS,
        argument: "--no-member-functions",
        help: "Discard all member functions.",
    },
    ImporterFlagInfo {
        flag: ImporterFlags::STRICT_PARSING,
        argument: "--strict",
        help: "Upgrade recoverable warnings to hard errors.",
    },
    ImporterFlagInfo {
        flag: ImporterFlags::TYPEDEF_ALL_ENUMS,
        argument: "--typedef-all-enums",
        help: "Give all enums the typedef storage class.",
    },
    ImporterFlagInfo {
        flag: ImporterFlags::TYPEDEF_ALL_STRUCTS,
        argument: "--typedef-all-structs",
        help: "Give all structs the typedef storage class.",
    },
    ImporterFlagInfo {
        flag: ImporterFlags::TYPEDEF_ALL_UNIONS,
        argument: "--typedef-all-unions",
        help: "Give all unions the typedef storage class.",
    },
];
