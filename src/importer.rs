use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use crate::analysis::symbol_class_to_global_variable_location;
use crate::analysis::AnalysisContext;
use crate::analysis::DemanglerFn;
use crate::analysis::ExternalGlobal;
use crate::analysis::LocalSymbolTableAnalyser;
use crate::ast::builtin_class_size;
use crate::ast::Node;
use crate::ast::NodeKind;
use crate::ast::TypeName;
use crate::ast::TypeNameSource;
use crate::database::DataTypeHandle;
use crate::database::RegisterStorage;
use crate::database::StackStorage;
use crate::database::Symbol;
use crate::database::SymbolDatabase;
use crate::database::SymbolSourceHandle;
use crate::database::VariableStorage;
use crate::elf::ElfFile;
use crate::flags::ImporterFlags;
use crate::mdebug;
use crate::mdebug::SymbolClass;
use crate::mdebug::SymbolTableReader;
use crate::mdebug::SymbolType;
use crate::stabs::StabsSymbol;
use crate::stabs::StabsSymbolDescriptor;
use crate::symbols::parse_symbols;
use crate::symbols::ParsedSymbolKind;
use crate::stabs_to_ast::StabsToAstState;
use crate::Error;
use crate::Result;

/// Everything the importer needs apart from the symbol table itself.
#[derive(Default)]
pub struct ImportOptions<'a> {
    pub flags: ImporterFlags,
    pub demangler: Option<&'a DemanglerFn>,
    /// Checked at the start of each translation unit; when it goes true the
    /// import stops promptly with [`Error::Interrupted`].
    pub interrupt: Option<&'a AtomicBool>,
}

/// Import a whole .mdebug symbol table into the database.
///
/// On failure, symbols created so far are left behind; callers that want to
/// roll back can destroy everything from `source`.
pub fn import_symbol_table(
    database: &mut SymbolDatabase,
    reader: &SymbolTableReader,
    source: SymbolSourceHandle,
    options: &ImportOptions,
) -> Result<()> {
    let external_symbols = reader.parse_external_symbols()?;

    // The addresses of the global variables aren't present in the local
    // symbol table, so extract them from the external table.
    let globals = build_external_globals(&external_symbols);

    let context = AnalysisContext {
        globals: Some(&globals),
        source,
        flags: options.flags,
        demangler: options.demangler,
        interrupt: options.interrupt,
    };

    for index in 0..reader.file_count() {
        check_interrupt(context.interrupt)?;
        let file = reader.parse_file(index)?;
        import_file(database, &file, &context)?;
    }

    finish_import(database, &context)
}

/// Build the name-to-address map used to fill in global variable addresses.
pub fn build_external_globals(
    external_symbols: &[mdebug::Symbol],
) -> HashMap<String, ExternalGlobal> {
    let mut globals = HashMap::new();
    for external in external_symbols {
        if external.symbol_type == SymbolType::Global
            && external.symbol_class != SymbolClass::Undefined
        {
            globals.insert(
                external.string.clone(),
                ExternalGlobal {
                    value: external.value,
                    symbol_class: external.symbol_class,
                },
            );
        }
    }
    globals
}

/// Import the symbols of a single translation unit.
pub fn import_file(
    database: &mut SymbolDatabase,
    file: &mdebug::File,
    context: &AnalysisContext,
) -> Result<()> {
    let source_file =
        database
            .source_files
            .create_symbol(file.full_path.clone(), Some(context.source), None)?;
    source_file.command_line_path = file.command_line_path.clone();
    source_file.working_dir = file.working_dir.clone();
    source_file.text_address = file.text_address;
    let source_file_handle = source_file.handle();

    // Sometimes the INFO symbols contain information about what toolchain
    // version was used to build the executable.
    for symbol in &file.symbols {
        if symbol.symbol_class == SymbolClass::Info && symbol.string != "@stabs" {
            if let Some(source_file) = database
                .source_files
                .symbol_from_handle_mut(source_file_handle)
            {
                source_file
                    .toolchain_version_info
                    .insert(symbol.string.clone());
            }
        }
    }

    // Parse the stab strings into a data structure that's vaguely one-to-one
    // with the text-based representation.
    let symbols = parse_symbols(&file.symbols, context.flags)?;

    // Types can be referenced by their number from other stabs, so build a
    // map of type numbers to the parsed types.
    let mut stabs_types = BTreeMap::new();
    for symbol in &symbols {
        if let ParsedSymbolKind::NameColonType { symbol, .. } = &symbol.kind {
            symbol.ty.enumerate_numbered_types(&mut stabs_types);
        }
    }

    let stabs_to_ast_state = StabsToAstState {
        file_handle: source_file_handle,
        stabs_types: &stabs_types,
        flags: context.flags,
    };

    let mut analyser =
        LocalSymbolTableAnalyser::new(database, &stabs_to_ast_state, context, source_file_handle);

    for symbol in &symbols {
        if symbol.duplicate {
            continue;
        }
        let raw = &file.symbols[symbol.raw];
        match &symbol.kind {
            ParsedSymbolKind::NameColonType {
                symbol: stabs_symbol,
                promoted_to_typedef,
            } => match stabs_symbol.descriptor {
                StabsSymbolDescriptor::LocalFunction | StabsSymbolDescriptor::GlobalFunction => {
                    analyser.function(
                        &stabs_symbol.name,
                        &stabs_symbol.ty,
                        address_from_value(raw.value),
                    )?;
                }
                StabsSymbolDescriptor::ReferenceParameterA
                | StabsSymbolDescriptor::RegisterParameter
                | StabsSymbolDescriptor::ValueParameter
                | StabsSymbolDescriptor::ReferenceParameterV => {
                    let is_stack_variable =
                        stabs_symbol.descriptor == StabsSymbolDescriptor::ValueParameter;
                    let is_by_reference = matches!(
                        stabs_symbol.descriptor,
                        StabsSymbolDescriptor::ReferenceParameterA
                            | StabsSymbolDescriptor::ReferenceParameterV
                    );
                    analyser.parameter(
                        &stabs_symbol.name,
                        &stabs_symbol.ty,
                        is_stack_variable,
                        raw.value,
                        is_by_reference,
                    )?;
                }
                StabsSymbolDescriptor::RegisterVariable
                | StabsSymbolDescriptor::LocalVariable
                | StabsSymbolDescriptor::StaticLocalVariable => {
                    let (storage, is_static) = local_variable_storage(stabs_symbol, raw)?;
                    analyser.local_variable(&stabs_symbol.name, &stabs_symbol.ty, storage, is_static)?;
                }
                StabsSymbolDescriptor::GlobalVariable
                | StabsSymbolDescriptor::StaticGlobalVariable => {
                    let is_static =
                        stabs_symbol.descriptor == StabsSymbolDescriptor::StaticGlobalVariable;
                    let mut address = None;
                    let mut location =
                        symbol_class_to_global_variable_location(raw.symbol_class);
                    if is_static {
                        // For static global variables the address is stored
                        // in the local symbol table.
                        address = address_from_value(raw.value);
                    } else if let Some(globals) = context.globals {
                        // The address of a non-static global variable is
                        // only stored in the external symbol table, so pull
                        // that information in here.
                        if let Some(external) = globals.get(&stabs_symbol.name) {
                            address = address_from_value(external.value);
                            location =
                                symbol_class_to_global_variable_location(external.symbol_class);
                        }
                    }
                    let location = location
                        .ok_or(Error::InvalidVariableLocation(raw.symbol_class.as_number()))?;
                    analyser.global_variable(
                        &stabs_symbol.name,
                        address,
                        &stabs_symbol.ty,
                        is_static,
                        location,
                    )?;
                }
                StabsSymbolDescriptor::TypeName | StabsSymbolDescriptor::EnumStructOrTypeTag => {
                    analyser.data_type(stabs_symbol, *promoted_to_typedef)?;
                }
            },
            ParsedSymbolKind::SourceFile => {
                analyser.source_file(&raw.string, raw.value as u32)?;
            }
            ParsedSymbolKind::SubSourceFile => {
                analyser.sub_source_file(&raw.string, raw.value as u32)?;
            }
            ParsedSymbolKind::BlockBegin => {
                analyser.block_begin(raw.value)?;
            }
            ParsedSymbolKind::BlockEnd => {
                analyser.block_end(raw.value)?;
            }
            ParsedSymbolKind::FunctionEnd => {
                analyser.function_end()?;
            }
            ParsedSymbolKind::NonStabs => {
                if raw.symbol_class == SymbolClass::Text {
                    match raw.symbol_type {
                        SymbolType::Proc => {
                            analyser.procedure(&raw.string, address_from_value(raw.value), false)?;
                        }
                        SymbolType::StaticProc => {
                            analyser.procedure(&raw.string, address_from_value(raw.value), true)?;
                        }
                        SymbolType::Label => {
                            analyser.label(
                                &raw.string,
                                address_from_value(raw.value),
                                raw.index as i32,
                            )?;
                        }
                        SymbolType::End => {
                            analyser.text_end(&raw.string, raw.value)?;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    analyser.finish()
}

/// Run the whole-table passes: single-file flags, type name resolution, and
/// size computation. [`import_symbol_table`] calls this automatically;
/// callers that drive [`import_file`] directly should call it afterwards.
pub fn finish_import(database: &mut SymbolDatabase, context: &AnalysisContext) -> Result<()> {
    // The files field may be modified by further analysis passes, so this
    // information needs to be saved here.
    for data_type in database.data_types.iter_mut() {
        if data_type.source() == context.source && data_type.files.len() == 1 {
            data_type.only_defined_in_single_translation_unit = true;
        }
    }

    resolve_type_names(database, context.source, context.flags)?;
    compute_size_bytes(database, context.source);

    Ok(())
}

fn check_interrupt(interrupt: Option<&AtomicBool>) -> Result<()> {
    if interrupt.is_some_and(|interrupt| interrupt.load(Ordering::Relaxed)) {
        return Err(Error::Interrupted);
    }
    Ok(())
}

fn address_from_value(value: i32) -> Option<u32> {
    (value != -1).then_some(value as u32)
}

fn local_variable_storage(
    stabs_symbol: &StabsSymbol,
    raw: &mdebug::Symbol,
) -> Result<(VariableStorage, bool)> {
    match stabs_symbol.descriptor {
        StabsSymbolDescriptor::StaticLocalVariable => {
            let location = symbol_class_to_global_variable_location(raw.symbol_class)
                .ok_or(Error::InvalidVariableLocation(raw.symbol_class.as_number()))?;
            Ok((
                VariableStorage::Global(crate::database::GlobalStorage {
                    location,
                    address: address_from_value(raw.value),
                }),
                true,
            ))
        }
        StabsSymbolDescriptor::RegisterVariable => Ok((
            VariableStorage::Register(RegisterStorage {
                dbx_register_number: raw.value,
                is_by_reference: false,
            }),
            false,
        )),
        _ => Ok((
            VariableStorage::Stack(StackStorage {
                stack_pointer_offset: raw.value,
            }),
            false,
        )),
    }
}

// *****************************************************************************

macro_rules! for_each_typed_symbol {
    ($database: expr, $list: ident, $source: expr, $node: ident, $body: block) => {
        let handles = $database.$list.handles();
        for handle in handles {
            let from_source = $database
                .$list
                .symbol_from_handle(handle)
                .map(|symbol| symbol.source() == $source)
                .unwrap_or(false);
            if !from_source {
                continue;
            }
            if let Some(mut $node) = $database.$list.take_type(handle) {
                let result = $body;
                $database.$list.restore_type(handle, $node);
                result?;
            }
        }
    };
}

/// Resolve `TypeName` placeholders to data type handles, synthesizing
/// forward-declared types where a type is declared but never defined.
fn resolve_type_names(
    database: &mut SymbolDatabase,
    source: SymbolSourceHandle,
    flags: ImporterFlags,
) -> Result<()> {
    for_each_typed_symbol!(database, data_types, source, node, {
        resolve_node(&mut node, database, source, flags)
    });
    for_each_typed_symbol!(database, functions, source, node, {
        resolve_node(&mut node, database, source, flags)
    });
    for_each_typed_symbol!(database, global_variables, source, node, {
        resolve_node(&mut node, database, source, flags)
    });
    for_each_typed_symbol!(database, local_variables, source, node, {
        resolve_node(&mut node, database, source, flags)
    });
    for_each_typed_symbol!(database, parameter_variables, source, node, {
        resolve_node(&mut node, database, source, flags)
    });
    Ok(())
}

fn resolve_node(
    node: &mut Node,
    database: &mut SymbolDatabase,
    source: SymbolSourceHandle,
    flags: ImporterFlags,
) -> Result<()> {
    if let NodeKind::TypeName(type_name) = &mut node.kind {
        resolve_type_name(type_name, database, source, flags)?;
    }
    for child in node.children_mut() {
        resolve_node(child, database, source, flags)?;
    }
    Ok(())
}

fn resolve_type_name(
    type_name: &mut TypeName,
    database: &mut SymbolDatabase,
    source: SymbolSourceHandle,
    _flags: ImporterFlags,
) -> Result<()> {
    let Some(unresolved) = type_name.unresolved_stabs.as_deref() else {
        return Ok(());
    };

    // Lookup the type by its STABS type number. This path ensures that the
    // correct type is found even if multiple types have the same name.
    if let (Some(file_handle), Some(number)) =
        (unresolved.referenced_file, unresolved.stabs_type_number)
    {
        if let Some(source_file) = database.source_files.symbol_from_handle(file_handle) {
            if let Some(&handle) = source_file.stabs_type_number_to_handle.get(&number) {
                type_name.data_type = Some(handle);
                type_name.is_forward_declared = false;
                type_name.unresolved_stabs = None;
                return Ok(());
            }
        }
    }

    // Looking up the type by its STABS type number failed, so look for it by
    // its name instead. This happens when a type is forward declared but not
    // defined in a given translation unit.
    if !unresolved.type_name.is_empty() {
        let handles = database
            .data_types
            .handles_from_name(&unresolved.type_name)
            .to_vec();
        for handle in handles {
            let matches = database
                .data_types
                .symbol_from_handle(handle)
                .is_some_and(|data_type| data_type.source() == source);
            if matches {
                type_name.data_type = Some(handle);
                type_name.is_forward_declared = true;
                type_name.unresolved_stabs = None;
                return Ok(());
            }
        }
    }

    // If this is a compiler-generated reference to an unnamed type (usually
    // the this parameter of a generated member function) we shouldn't create
    // a forward declared type for it.
    if type_name.source == TypeNameSource::UnnamedThis {
        return Ok(());
    }

    // Type lookup failed. This happens when a type is forward declared in a
    // translation unit with symbols but is not defined in one. We haven't
    // already created a forward declared type, so create one now.
    let Some(kind) = unresolved.forward_declared_kind else {
        return Ok(());
    };
    let name = unresolved.type_name.clone();
    let forward_declared = database
        .data_types
        .create_symbol(name, Some(source), None)?;
    forward_declared.set_type(Box::new(Node::new(NodeKind::ForwardDeclared { kind })));
    forward_declared.not_defined_in_any_translation_unit = true;
    let handle = forward_declared.handle();

    type_name.data_type = Some(handle);
    type_name.is_forward_declared = true;
    type_name.unresolved_stabs = None;

    Ok(())
}

// *****************************************************************************

/// Compute the size in bytes of every type AST from the given source, then
/// propagate the sizes onto global variables and static locals.
fn compute_size_bytes(database: &mut SymbolDatabase, source: SymbolSourceHandle) {
    let mut visiting = HashSet::new();
    for_each_typed_symbol_infallible(database, source, &mut visiting);

    // Propagate the size information to the global variable symbols.
    let global_sizes: Vec<_> = database
        .global_variables
        .iter()
        .map(|global| {
            let size = global.ty().map(|ty| ty.computed_size_bytes).unwrap_or(-1);
            (global.handle(), size)
        })
        .collect();
    for (handle, size) in global_sizes {
        if size > -1 {
            if let Some(global) = database.global_variables.symbol_from_handle_mut(handle) {
                global.set_size(size as u32);
            }
        }
    }

    // And to the static local variable symbols.
    let local_sizes: Vec<_> = database
        .local_variables
        .iter()
        .filter(|local| matches!(local.storage, VariableStorage::Global(_)))
        .map(|local| {
            let size = local.ty().map(|ty| ty.computed_size_bytes).unwrap_or(-1);
            (local.handle(), size)
        })
        .collect();
    for (handle, size) in local_sizes {
        if size > -1 {
            if let Some(local) = database.local_variables.symbol_from_handle_mut(handle) {
                local.set_size(size as u32);
            }
        }
    }
}

fn for_each_typed_symbol_infallible(
    database: &mut SymbolDatabase,
    source: SymbolSourceHandle,
    visiting: &mut HashSet<u32>,
) {
    macro_rules! compute_list {
        ($list: ident) => {
            let handles = database.$list.handles();
            for handle in handles {
                let from_source = database
                    .$list
                    .symbol_from_handle(handle)
                    .map(|symbol| symbol.source() == source)
                    .unwrap_or(false);
                if !from_source {
                    continue;
                }
                if let Some(mut node) = database.$list.take_type(handle) {
                    compute_node_size(&mut node, database, visiting);
                    database.$list.restore_type(handle, node);
                }
            }
        };
    }
    compute_list!(data_types);
    compute_list!(functions);
    compute_list!(global_variables);
    compute_list!(local_variables);
    compute_list!(parameter_variables);
}

/// Post-order size computation with memoization. `-1` means unknown, and the
/// `cannot_compute_size` flag breaks cycles through type names.
fn compute_node_size(node: &mut Node, database: &mut SymbolDatabase, visiting: &mut HashSet<u32>) {
    for child in node.children_mut() {
        compute_node_size(child, database, visiting);
    }

    if node.computed_size_bytes > -1 || node.cannot_compute_size {
        return;
    }
    node.cannot_compute_size = true;

    let computed = match &node.kind {
        NodeKind::Array {
            element_type,
            element_count,
        } => (element_type.computed_size_bytes > -1)
            .then(|| element_type.computed_size_bytes * element_count),
        NodeKind::BuiltIn { class } => Some(builtin_class_size(*class)),
        NodeKind::Enum { .. } => Some(4),
        NodeKind::PointerOrReference { .. } => Some(4),
        NodeKind::StructOrUnion(_) => Some(node.size_bits / 8),
        NodeKind::TypeName(type_name) => {
            if type_name.is_forward_declared {
                None
            } else {
                match type_name.data_type {
                    Some(handle) => {
                        let size = data_type_size(database, handle, visiting);
                        (size > -1).then_some(size)
                    }
                    None => None,
                }
            }
        }
        NodeKind::BitField { .. }
        | NodeKind::Data { .. }
        | NodeKind::ForwardDeclared { .. }
        | NodeKind::Function(_)
        | NodeKind::InitializerList { .. }
        | NodeKind::PointerToDataMember { .. } => None,
    };

    if let Some(computed) = computed {
        node.computed_size_bytes = computed;
        node.cannot_compute_size = false;
    }
}

fn data_type_size(
    database: &mut SymbolDatabase,
    handle: DataTypeHandle,
    visiting: &mut HashSet<u32>,
) -> i32 {
    if let Some(data_type) = database.data_types.symbol_from_handle(handle) {
        if let Some(node) = data_type.ty() {
            if node.computed_size_bytes > -1 || node.cannot_compute_size {
                return node.computed_size_bytes;
            }
        }
    }
    if !visiting.insert(handle.value()) {
        return -1;
    }
    let size = match database.data_types.take_type(handle) {
        Some(mut node) => {
            compute_node_size(&mut node, database, visiting);
            let size = node.computed_size_bytes;
            database.data_types.restore_type(handle, node);
            size
        }
        None => -1,
    };
    visiting.remove(&handle.value());
    size
}

// *****************************************************************************

/// Fill in pointers from member function declarations to the corresponding
/// function definitions, matching them up by their demangled names.
pub fn link_member_functions(database: &mut SymbolDatabase) {
    let function_handles = database.functions.handles();
    for function_handle in function_handles {
        let Some(function) = database.functions.symbol_from_handle(function_handle) else {
            continue;
        };
        let demangled_name = function.name().to_string();
        let Some(name_separator) = demangled_name.rfind(':') else {
            continue;
        };
        if name_separator < 1 {
            continue;
        }
        let function_name = demangled_name[name_separator + 1..].to_string();
        let before_separator = &demangled_name[..name_separator - 1];
        let type_name = match before_separator.rfind(':') {
            Some(position) => &before_separator[position + 1..],
            None => before_separator,
        };

        // This won't work for some template types, so also try the name with
        // the template arguments stripped.
        let mut candidates = vec![type_name.to_string()];
        let stripped = &type_name[..type_name.find('<').unwrap_or(type_name.len())];
        if stripped != type_name {
            candidates.push(stripped.to_string());
        }

        let mut is_member_function = false;
        for candidate in &candidates {
            let data_type_handles = database.data_types.handles_from_name(candidate).to_vec();
            for data_type_handle in data_type_handles {
                let Some(data_type) = database.data_types.symbol_from_handle_mut(data_type_handle)
                else {
                    continue;
                };
                let Some(node) = data_type.ty_mut() else {
                    continue;
                };
                let NodeKind::StructOrUnion(struct_or_union) = &mut node.kind else {
                    continue;
                };
                for declaration in &mut struct_or_union.member_functions {
                    if declaration.name == function_name {
                        if let NodeKind::Function(function_type) = &mut declaration.kind {
                            function_type.definition_handle = Some(function_handle);
                        }
                        is_member_function = true;
                    }
                }
            }
        }
        if is_member_function {
            if let Some(function) = database.functions.symbol_from_handle_mut(function_handle) {
                function.is_member_function_ish = true;
            }
        }
    }
}

// *****************************************************************************

/// Create section symbols from the ELF section headers and import the
/// .mdebug symbol table, if one is present.
pub fn import_elf(
    database: &mut SymbolDatabase,
    elf: &ElfFile,
    options: &ImportOptions,
) -> Result<SymbolSourceHandle> {
    let section_source = database
        .symbol_sources
        .create_symbol("ELF Section Headers", None, None)?
        .handle();
    for section in &elf.sections {
        let symbol = database.sections.create_symbol(
            section.name.clone(),
            Some(section_source),
            section.virtual_address,
        )?;
        symbol.set_size(section.size);
    }

    let section = elf.mdebug_section().ok_or(Error::NoMdebugSection)?;
    let reader = SymbolTableReader::new(elf.image(), section.offset as u64)?;
    let source = database
        .symbol_sources
        .create_symbol(".mdebug", None, None)?
        .handle();
    import_symbol_table(database, &reader, source, options)?;
    Ok(source)
}
