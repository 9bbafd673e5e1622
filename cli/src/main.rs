use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use fs_err::read;
use mipsym::identify_symbol_tables;
use mipsym::import_elf;
use mipsym::link_member_functions;
use mipsym::mdebug_section::SymbolTableReader;
use mipsym::mdebug_section::SymbolicHeader;
use mipsym::ElfFile;
use mipsym::ImportOptions;
use mipsym::ImporterFlags;
use mipsym::Symbol;
use mipsym::SymbolDatabase;

mod logger;

use self::logger::Logger;

#[derive(clap::Parser)]
#[clap(version, about = "Prints the .mdebug/STABS symbol tables of PS2 ELF files.")]
struct Args {
    /// Verbose output.
    #[clap(short = 'v', long = "verbose")]
    verbose: bool,

    #[clap(flatten)]
    importer: ImporterArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Print the symbolic header.
    Headers {
        /// ELF file.
        #[clap(value_name = "ELF file")]
        file: PathBuf,
    },
    /// Print the source files.
    Files {
        #[clap(value_name = "ELF file")]
        file: PathBuf,
    },
    /// Print the functions.
    Functions {
        #[clap(value_name = "ELF file")]
        file: PathBuf,
    },
    /// Print the global variables.
    Globals {
        #[clap(value_name = "ELF file")]
        file: PathBuf,
    },
    /// Print the reconstructed data types.
    Types {
        #[clap(value_name = "ELF file")]
        file: PathBuf,
    },
    /// Print the external symbols.
    Externals {
        #[clap(value_name = "ELF file")]
        file: PathBuf,
    },
    /// Print which symbol table formats are present.
    Formats {
        #[clap(value_name = "ELF file")]
        file: PathBuf,
    },
    /// List the importer flags.
    Flags,
}

#[derive(clap::Args)]
struct ImporterArgs {
    /// Do not deduplicate matching data types from different translation
    /// units.
    #[clap(long)]
    dont_deduplicate_types: bool,

    /// Do not demangle function and global variable names.
    #[clap(long)]
    dont_demangle_names: bool,

    /// Include member functions that were likely generated by the compiler.
    #[clap(long)]
    include_generated_member_functions: bool,

    /// Treat all fields and member functions as public.
    #[clap(long)]
    no_access_specifiers: bool,

    /// Discard all member functions.
    #[clap(long)]
    no_member_functions: bool,

    /// Upgrade recoverable warnings to hard errors.
    #[clap(long)]
    strict: bool,

    /// Give all enums the typedef storage class.
    #[clap(long)]
    typedef_all_enums: bool,

    /// Give all structs the typedef storage class.
    #[clap(long)]
    typedef_all_structs: bool,

    /// Give all unions the typedef storage class.
    #[clap(long)]
    typedef_all_unions: bool,
}

impl ImporterArgs {
    fn flags(&self) -> ImporterFlags {
        let mut flags = ImporterFlags::empty();
        flags.set(
            ImporterFlags::DONT_DEDUPLICATE_TYPES,
            self.dont_deduplicate_types,
        );
        flags.set(ImporterFlags::DONT_DEMANGLE_NAMES, self.dont_demangle_names);
        flags.set(
            ImporterFlags::INCLUDE_GENERATED_MEMBER_FUNCTIONS,
            self.include_generated_member_functions,
        );
        flags.set(ImporterFlags::NO_ACCESS_SPECIFIERS, self.no_access_specifiers);
        flags.set(ImporterFlags::NO_MEMBER_FUNCTIONS, self.no_member_functions);
        flags.set(ImporterFlags::STRICT_PARSING, self.strict);
        flags.set(ImporterFlags::TYPEDEF_ALL_ENUMS, self.typedef_all_enums);
        flags.set(ImporterFlags::TYPEDEF_ALL_STRUCTS, self.typedef_all_structs);
        flags.set(ImporterFlags::TYPEDEF_ALL_UNIONS, self.typedef_all_unions);
        flags
    }
}

fn main() -> ExitCode {
    match do_main() {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn do_main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    Logger::init(args.verbose)?;
    let flags = args.importer.flags();
    match args.command {
        Command::Headers { file } => headers(&load(&file)?),
        Command::Files { file } => files(&import(&load(&file)?, flags)?),
        Command::Functions { file } => functions(&import(&load(&file)?, flags)?),
        Command::Globals { file } => globals(&import(&load(&file)?, flags)?),
        Command::Types { file } => types(&import(&load(&file)?, flags)?),
        Command::Externals { file } => externals(&load(&file)?),
        Command::Formats { file } => formats(&load(&file)?),
        Command::Flags => flags_help(),
    }
}

fn flags_help() -> Result<(), Box<dyn std::error::Error>> {
    for info in mipsym::IMPORTER_FLAG_INFOS {
        println!("{:40} {}", info.argument.bold(), info.help);
    }
    Ok(())
}

fn load(file: &Path) -> Result<ElfFile, Box<dyn std::error::Error>> {
    let image = read(file)?;
    Ok(ElfFile::parse(image)?)
}

fn reader(elf: &ElfFile) -> Result<SymbolTableReader<'_>, Box<dyn std::error::Error>> {
    let section = elf
        .mdebug_section()
        .ok_or(mipsym::Error::NoMdebugSection)?;
    Ok(SymbolTableReader::new(elf.image(), section.offset as u64)?)
}

fn import(
    elf: &ElfFile,
    flags: ImporterFlags,
) -> Result<SymbolDatabase, Box<dyn std::error::Error>> {
    let mut database = SymbolDatabase::new();
    let options = ImportOptions {
        flags,
        demangler: None,
        interrupt: None,
    };
    import_elf(&mut database, elf, &options)?;
    link_member_functions(&mut database);
    Ok(database)
}

fn headers(elf: &ElfFile) -> Result<(), Box<dyn std::error::Error>> {
    let reader = reader(elf)?;
    let header: &SymbolicHeader = reader.header();
    println!(
        "{}, magic = {:#x}, vstamp = {:#x}",
        "Symbolic Header".bold(),
        header.magic,
        header.version_stamp
    );
    println!();
    println!("  {:28}{:>10}  {:>10}", "", "Offset", "Count");
    let row = |name: &str, offset: i32, count: i32| {
        println!("  {name:28}{offset:#10x}  {count:10}");
    };
    row("Line Numbers", header.line_numbers_offset, header.line_number_count);
    row("Dense Numbers", header.dense_numbers_offset, header.dense_numbers_count);
    row(
        "Procedure Descriptors",
        header.procedure_descriptors_offset,
        header.procedure_descriptor_count,
    );
    row("Local Symbols", header.local_symbols_offset, header.local_symbol_count);
    row(
        "Optimization Symbols",
        header.optimization_symbols_offset,
        header.optimization_symbols_count,
    );
    row(
        "Auxiliary Symbols",
        header.auxiliary_symbols_offset,
        header.auxiliary_symbol_count,
    );
    row(
        "Local Strings",
        header.local_strings_offset,
        header.local_strings_size_bytes,
    );
    row(
        "External Strings",
        header.external_strings_offset,
        header.external_strings_size_bytes,
    );
    row(
        "File Descriptors",
        header.file_descriptors_offset,
        header.file_descriptor_count,
    );
    row(
        "Relative File Descriptors",
        header.relative_file_descriptors_offset,
        header.relative_file_descriptor_count,
    );
    row(
        "External Symbols",
        header.external_symbols_offset,
        header.external_symbols_count,
    );
    Ok(())
}

fn files(database: &SymbolDatabase) -> Result<(), Box<dyn std::error::Error>> {
    for source_file in &database.source_files {
        println!("{}", source_file.full_path().bold());
        if !source_file.working_dir.is_empty() {
            println!("  working dir: {}", source_file.working_dir);
        }
        println!("  text address: {:#x}", source_file.text_address);
        println!(
            "  functions: {}",
            database.functions.span(source_file.functions()).len()
        );
        println!(
            "  globals: {}",
            database
                .global_variables
                .span(source_file.global_variables())
                .len()
        );
        for version in &source_file.toolchain_version_info {
            println!("  toolchain: {version}");
        }
    }
    Ok(())
}

fn functions(database: &SymbolDatabase) -> Result<(), Box<dyn std::error::Error>> {
    println!("{:>10}  {:>8}  Name", "Address", "Size");
    for function in &database.functions {
        let address = function
            .address()
            .map(|address| format!("{address:#x}"))
            .unwrap_or_else(|| "-".to_string());
        println!("{:>10}  {:8}  {}", address, function.size(), function.name());
    }
    Ok(())
}

fn globals(database: &SymbolDatabase) -> Result<(), Box<dyn std::error::Error>> {
    println!("{:>10}  {:10}  Name", "Address", "Location");
    for global in &database.global_variables {
        let address = global
            .address()
            .map(|address| format!("{address:#x}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>10}  {:10}  {}",
            address,
            global.storage.location.to_string(),
            global.name()
        );
    }
    Ok(())
}

fn types(database: &SymbolDatabase) -> Result<(), Box<dyn std::error::Error>> {
    for data_type in &database.data_types {
        let node = match data_type.ty() {
            Some(node) => node,
            None => continue,
        };
        let size = node.computed_size_bytes;
        let mut line = format!("{:24} {:16}", data_type.name(), node.kind_name());
        if size > -1 {
            line.push_str(&format!(" size {size}"));
        }
        if data_type.files.len() > 1 {
            line.push_str(&format!(" ({} files)", data_type.files.len()));
        }
        if let Some(reason) = data_type.compare_fail_reason {
            line.push_str(&format!(" {}", format!("[conflict: {reason}]").yellow()));
        }
        println!("{line}");
    }
    Ok(())
}

fn externals(elf: &ElfFile) -> Result<(), Box<dyn std::error::Error>> {
    let reader = reader(elf)?;
    println!("{:>10}  {:12}  {:12}  Name", "Value", "Type", "Class");
    for external in reader.parse_external_symbols()? {
        println!(
            "{:>10x}  {:12}  {:12}  {}",
            external.value,
            format!("{:?}", external.symbol_type),
            format!("{:?}", external.symbol_class),
            external.string
        );
    }
    Ok(())
}

fn formats(elf: &ElfFile) -> Result<(), Box<dyn std::error::Error>> {
    let formats = identify_symbol_tables(elf);
    if formats.is_empty() {
        println!("no known symbol tables");
        return Ok(());
    }
    for (name, _) in formats.iter_names() {
        println!("{}", name.to_lowercase());
    }
    Ok(())
}
