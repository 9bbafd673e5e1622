use std::collections::HashMap;
use std::sync::atomic::AtomicBool;

use crate::ast::NodeKind;
use crate::ast::StorageClass;
use crate::database::expand_to_include;
use crate::database::Function;
use crate::database::FunctionHandle;
use crate::database::GlobalStorage;
use crate::database::GlobalStorageLocation;
use crate::database::GlobalVariable;
use crate::database::LineNumberPair;
use crate::database::LocalVariable;
use crate::database::LocalVariableHandle;
use crate::database::ParameterStorage;
use crate::database::ParameterVariable;
use crate::database::RegisterStorage;
use crate::database::ShouldDeleteOldSymbols;
use crate::database::SourceFileHandle;
use crate::database::StackStorage;
use crate::database::SubSourceFile;
use crate::database::Symbol;
use crate::database::SymbolDatabase;
use crate::database::SymbolRange;
use crate::database::SymbolSourceHandle;
use crate::database::VariableStorage;
use crate::flags::ImporterFlags;
use crate::mdebug::SymbolClass;
use crate::stabs::StabsSymbol;
use crate::stabs::StabsType;
use crate::stabs::StabsTypeBody;
use crate::stabs_to_ast::stabs_type_to_ast;
use crate::stabs_to_ast::stabs_type_to_ast_or_error_node;
use crate::stabs_to_ast::StabsToAstState;
use crate::Error;
use crate::Result;

/// The signature of the external demangler. Returns `None` when the input
/// isn't a mangled name.
pub type DemanglerFn = dyn Fn(&str, ImporterFlags) -> Option<String>;

/// The address and storage class of a global, pulled out of the external
/// symbol table.
#[derive(Debug, Clone, Copy)]
pub struct ExternalGlobal {
    pub value: i32,
    pub symbol_class: SymbolClass,
}

/// Unchanging state threaded through the import of a symbol table.
pub struct AnalysisContext<'a> {
    /// Addresses of global variables by name, built from the external
    /// symbol table. Absent when importing a single file in isolation.
    pub globals: Option<&'a HashMap<String, ExternalGlobal>>,
    pub source: SymbolSourceHandle,
    pub flags: ImporterFlags,
    pub demangler: Option<&'a DemanglerFn>,
    pub interrupt: Option<&'a AtomicBool>,
}

/// Most compilers emit the records of a function in the following order:
///
/// ```text
/// func
/// ... parameters ...
/// proc
/// ... line numbers ...
/// end
/// ... locals and blocks ...
/// ```
///
/// Some older compilers emit `proc`/`end` first and `func` afterwards; both
/// orders drive the same three-state machine.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum AnalysisState {
    NotInFunction,
    InFunctionBeginning,
    InFunctionEnd,
}

/// Consumes the categorized symbol stream of one translation unit and emits
/// functions, variables, types and line numbers into the database.
pub struct LocalSymbolTableAnalyser<'a, 'b> {
    database: &'a mut SymbolDatabase,
    stabs_to_ast_state: &'a StabsToAstState<'b>,
    context: &'a AnalysisContext<'a>,
    source_file: SourceFileHandle,

    state: AnalysisState,
    text_address: u32,
    functions: Option<SymbolRange<Function>>,
    global_variables: Option<SymbolRange<GlobalVariable>>,
    current_function: Option<FunctionHandle>,
    current_parameter_variables: Option<SymbolRange<ParameterVariable>>,
    current_local_variables: Option<SymbolRange<LocalVariable>>,
    pending_local_variables: Vec<LocalVariableHandle>,
    blocks: Vec<Vec<LocalVariableHandle>>,
    next_relative_path: String,
}

impl<'a, 'b> LocalSymbolTableAnalyser<'a, 'b> {
    pub fn new(
        database: &'a mut SymbolDatabase,
        stabs_to_ast_state: &'a StabsToAstState<'b>,
        context: &'a AnalysisContext<'a>,
        source_file: SourceFileHandle,
    ) -> Self {
        Self {
            database,
            stabs_to_ast_state,
            context,
            source_file,
            state: AnalysisState::NotInFunction,
            text_address: 0,
            functions: None,
            global_variables: None,
            current_function: None,
            current_parameter_variables: None,
            current_local_variables: None,
            pending_local_variables: Vec::new(),
            blocks: Vec::new(),
            next_relative_path: String::new(),
        }
    }

    pub fn source_file(&mut self, path: &str, text_address: u32) -> Result<()> {
        self.text_address = text_address;
        if let Some(source_file) = self.database.source_files.symbol_from_handle_mut(self.source_file)
        {
            source_file.relative_path = path.to_string();
            source_file.text_address = text_address;
        }
        if self.next_relative_path.is_empty() {
            self.next_relative_path = path.to_string();
        }
        Ok(())
    }

    pub fn data_type(&mut self, symbol: &StabsSymbol, promoted_to_typedef: bool) -> Result<()> {
        let mut node = stabs_type_to_ast(&symbol.ty, self.stabs_to_ast_state, 0, 0, false, false)?;
        node.name = symbol.name.clone();
        node.stabs_type_number = symbol.ty.number;

        // The C compilers use the typedef descriptor for plain enum
        // definitions, so for enums the descriptor alone doesn't make the
        // type a typedef.
        let is_direct_enum = matches!(symbol.ty.body, Some(StabsTypeBody::Enum { .. }));
        if (symbol.ty.is_typedef && !is_direct_enum) || promoted_to_typedef {
            node.storage_class = StorageClass::Typedef;
        }
        let force_typedef = match &node.kind {
            NodeKind::Enum { .. } => self.context.flags.contains(ImporterFlags::TYPEDEF_ALL_ENUMS),
            NodeKind::StructOrUnion(struct_or_union) => {
                if struct_or_union.is_struct {
                    self.context
                        .flags
                        .contains(ImporterFlags::TYPEDEF_ALL_STRUCTS)
                } else {
                    self.context
                        .flags
                        .contains(ImporterFlags::TYPEDEF_ALL_UNIONS)
                }
            }
            _ => false,
        };
        if force_typedef {
            node.storage_class = StorageClass::Typedef;
        }

        if self
            .context
            .flags
            .contains(ImporterFlags::DONT_DEDUPLICATE_TYPES)
        {
            let data_type =
                self.database
                    .data_types
                    .create_symbol(&symbol.name, Some(self.context.source), None)?;
            data_type.set_type(node);
            let handle = data_type.handle();
            if let (Some(number), Some(source_file)) = (
                symbol.ty.number,
                self.database
                    .source_files
                    .symbol_from_handle_mut(self.source_file),
            ) {
                source_file
                    .stabs_type_number_to_handle
                    .insert(number, handle);
            }
        } else {
            self.database.create_data_type_if_unique(
                node,
                symbol.ty.number,
                &symbol.name,
                self.source_file,
                self.context.source,
            )?;
        }

        Ok(())
    }

    pub fn global_variable(
        &mut self,
        name: &str,
        address: Option<u32>,
        ty: &StabsType,
        is_static: bool,
        location: GlobalStorageLocation,
    ) -> Result<()> {
        let demangled = self.demangle(name);
        let output_name = demangled.as_deref().unwrap_or(name);
        let global = self.database.global_variables.create_symbol(
            output_name,
            Some(self.context.source),
            address,
        )?;
        if demangled.is_some() {
            global.set_mangled_name(name.to_string());
        }
        global.storage = GlobalStorage { location, address };
        global.storage_class = if is_static {
            StorageClass::Static
        } else {
            StorageClass::None
        };
        let handle = global.handle();
        expand_to_include(&mut self.global_variables, handle);

        let node = stabs_type_to_ast_or_error_node(ty, self.stabs_to_ast_state, true, false)?;
        if let Some(global) = self.database.global_variables.symbol_from_handle_mut(handle) {
            global.set_type(node);
        }

        Ok(())
    }

    pub fn sub_source_file(&mut self, path: &str, text_address: u32) -> Result<()> {
        if self.state == AnalysisState::InFunctionBeginning {
            if let Some(function) = self.current_function_mut() {
                function.sub_source_files.push(SubSourceFile {
                    address: text_address,
                    relative_path: path.to_string(),
                });
                return Ok(());
            }
        }
        self.next_relative_path = path.to_string();
        Ok(())
    }

    pub fn procedure(&mut self, name: &str, address: Option<u32>, is_static: bool) -> Result<()> {
        let matches_current = self
            .current_function()
            .is_some_and(|function| function.mangled_name() == name);
        if !matches_current {
            self.create_function(address, name)?;
        }

        if let Some(handle) = self.current_function {
            self.database.functions.move_symbol(handle, address);
            if is_static {
                if let Some(function) = self.database.functions.symbol_from_handle_mut(handle) {
                    function.storage_class = StorageClass::Static;
                }
            }
        }

        self.pending_local_variables.clear();
        self.blocks.clear();

        Ok(())
    }

    pub fn label(&mut self, label: &str, address: Option<u32>, line_number: i32) -> Result<()> {
        let Some(address) = address else {
            return Ok(());
        };
        if self.current_function.is_none() || !label.starts_with('$') {
            return Ok(());
        }
        if address >= 256 * 1024 * 1024 {
            return Err(Error::LabelAddressTooBig(address));
        }
        if let Some(function) = self.current_function_mut() {
            function.line_numbers.push(LineNumberPair {
                address,
                line_number,
            });
        }
        Ok(())
    }

    pub fn text_end(&mut self, _name: &str, function_size: i32) -> Result<()> {
        if self.state == AnalysisState::InFunctionBeginning {
            if let Some(handle) = self.current_function {
                let has_address = self
                    .database
                    .functions
                    .symbol_from_handle(handle)
                    .and_then(|function| function.address())
                    .is_some();
                if has_address {
                    if let Some(function) = self.database.functions.symbol_from_handle_mut(handle) {
                        function.set_size(function_size as u32);
                    }
                }
            }
            self.state = AnalysisState::InFunctionEnd;
        }
        Ok(())
    }

    pub fn function(&mut self, name: &str, return_type: &StabsType, address: Option<u32>) -> Result<()> {
        let matches_current = self
            .current_function()
            .is_some_and(|function| function.mangled_name() == name);
        if !matches_current {
            self.create_function(address, name)?;
        }

        let node = stabs_type_to_ast_or_error_node(return_type, self.stabs_to_ast_state, true, true)?;
        if let Some(function) = self.current_function_mut() {
            function.set_type(node);
        }

        Ok(())
    }

    pub fn function_end(&mut self) -> Result<()> {
        if let Some(handle) = self.current_function {
            self.database.set_function_parameter_variables(
                handle,
                self.current_parameter_variables,
                ShouldDeleteOldSymbols::DontDeleteOldSymbols,
            );
            self.database.set_function_local_variables(
                handle,
                self.current_local_variables,
                ShouldDeleteOldSymbols::DontDeleteOldSymbols,
            );
        }

        self.current_function = None;
        self.current_parameter_variables = None;
        self.current_local_variables = None;

        Ok(())
    }

    pub fn parameter(
        &mut self,
        name: &str,
        ty: &StabsType,
        is_stack_variable: bool,
        offset_or_register: i32,
        is_by_reference: bool,
    ) -> Result<()> {
        if self.current_function.is_none() {
            return Err(Error::SymbolBeforeProcedure("parameter"));
        }

        let parameter = self.database.parameter_variables.create_symbol(
            name,
            Some(self.context.source),
            None,
        )?;
        parameter.storage = if is_stack_variable {
            ParameterStorage::Stack(StackStorage {
                stack_pointer_offset: offset_or_register,
            })
        } else {
            ParameterStorage::Register(RegisterStorage {
                dbx_register_number: offset_or_register,
                is_by_reference,
            })
        };
        let handle = parameter.handle();
        expand_to_include(&mut self.current_parameter_variables, handle);

        let node = stabs_type_to_ast_or_error_node(ty, self.stabs_to_ast_state, true, true)?;
        if let Some(parameter) = self
            .database
            .parameter_variables
            .symbol_from_handle_mut(handle)
        {
            parameter.set_type(node);
        }

        Ok(())
    }

    pub fn local_variable(
        &mut self,
        name: &str,
        ty: &StabsType,
        storage: VariableStorage,
        is_static: bool,
    ) -> Result<()> {
        if self.current_function.is_none() {
            return Ok(());
        }

        let address = match &storage {
            VariableStorage::Global(global_storage) => global_storage.address,
            _ => None,
        };
        let local = self.database.local_variables.create_symbol(
            name,
            Some(self.context.source),
            address,
        )?;
        local.storage = storage;
        let handle = local.handle();
        self.pending_local_variables.push(handle);
        expand_to_include(&mut self.current_local_variables, handle);

        let mut node = stabs_type_to_ast_or_error_node(ty, self.stabs_to_ast_state, true, false)?;
        if is_static {
            node.storage_class = StorageClass::Static;
        }
        if let Some(local) = self.database.local_variables.symbol_from_handle_mut(handle) {
            local.set_type(node);
        }

        Ok(())
    }

    pub fn block_begin(&mut self, begin_offset: i32) -> Result<()> {
        let low = self.text_address.wrapping_add(begin_offset as u32);
        let block = core::mem::take(&mut self.pending_local_variables);
        for &handle in &block {
            if let Some(local) = self.database.local_variables.symbol_from_handle_mut(handle) {
                local.live_range.low = Some(low);
            }
        }
        self.blocks.push(block);
        Ok(())
    }

    pub fn block_end(&mut self, end_offset: i32) -> Result<()> {
        let Some(block) = self.blocks.pop() else {
            return Err(Error::UnmatchedBlockEnd);
        };
        let high = self.text_address.wrapping_add(end_offset as u32);
        for handle in block {
            if let Some(local) = self.database.local_variables.symbol_from_handle_mut(handle) {
                local.live_range.high = Some(high);
            }
        }
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        if self.state == AnalysisState::InFunctionBeginning {
            let name = self
                .database
                .source_files
                .symbol_from_handle(self.source_file)
                .map(|source_file| source_file.name().to_string())
                .unwrap_or_default();
            return Err(Error::UnexpectedEndOfSymbolTable(name));
        }

        self.database.set_source_file_functions(
            self.source_file,
            self.functions,
            ShouldDeleteOldSymbols::DontDeleteOldSymbols,
        );
        self.database.set_source_file_global_variables(
            self.source_file,
            self.global_variables,
            ShouldDeleteOldSymbols::DontDeleteOldSymbols,
        );

        Ok(())
    }

    fn create_function(&mut self, address: Option<u32>, name: &str) -> Result<()> {
        let demangled = self.demangle(name);
        let output_name = demangled.as_deref().unwrap_or(name);
        let function =
            self.database
                .functions
                .create_symbol(output_name, Some(self.context.source), address)?;
        if demangled.is_some() {
            function.set_mangled_name(name.to_string());
        }
        let handle = function.handle();
        self.current_function = Some(handle);
        self.current_parameter_variables = None;
        self.current_local_variables = None;
        expand_to_include(&mut self.functions, handle);

        self.state = AnalysisState::InFunctionBeginning;

        let relative_path = self
            .database
            .source_files
            .symbol_from_handle(self.source_file)
            .map(|source_file| source_file.relative_path.clone())
            .unwrap_or_default();
        if !self.next_relative_path.is_empty() && self.next_relative_path != relative_path {
            let next_relative_path = self.next_relative_path.clone();
            if let Some(function) = self.current_function_mut() {
                function.relative_path = Some(next_relative_path);
            }
        }

        Ok(())
    }

    fn current_function(&self) -> Option<&Function> {
        self.current_function
            .and_then(|handle| self.database.functions.symbol_from_handle(handle))
    }

    fn current_function_mut(&mut self) -> Option<&mut Function> {
        self.current_function
            .and_then(|handle| self.database.functions.symbol_from_handle_mut(handle))
    }

    fn demangle(&self, name: &str) -> Option<String> {
        if self
            .context
            .flags
            .contains(ImporterFlags::DONT_DEMANGLE_NAMES)
        {
            return None;
        }
        let demangler = self.context.demangler?;
        demangler(name, self.context.flags)
    }
}

/// Map a symbol's storage class byte onto a global variable location.
pub fn symbol_class_to_global_variable_location(
    symbol_class: SymbolClass,
) -> Option<GlobalStorageLocation> {
    match symbol_class {
        SymbolClass::Nil => Some(GlobalStorageLocation::Nil),
        SymbolClass::Data => Some(GlobalStorageLocation::Data),
        SymbolClass::Bss => Some(GlobalStorageLocation::Bss),
        SymbolClass::Abs => Some(GlobalStorageLocation::Abs),
        SymbolClass::Sdata => Some(GlobalStorageLocation::Sdata),
        SymbolClass::Sbss => Some(GlobalStorageLocation::Sbss),
        SymbolClass::Rdata => Some(GlobalStorageLocation::Rdata),
        SymbolClass::Common => Some(GlobalStorageLocation::Common),
        SymbolClass::Scommon => Some(GlobalStorageLocation::Scommon),
        SymbolClass::Sundefined => Some(GlobalStorageLocation::Sundefined),
        _ => None,
    }
}
