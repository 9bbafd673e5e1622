use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use crate::ast::compare_fail_reason_to_string;
use crate::ast::compare_nodes;
use crate::ast::CompareResultKind;
use crate::ast::Node;
use crate::ast::NodeKind;
use crate::ast::StorageClass;
use crate::stabs::TypeNum;
use crate::Error;
use crate::Result;

/// Identifies which of the symbol lists a symbol lives in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SymbolDescriptor {
    DataType,
    Function,
    GlobalVariable,
    Label,
    LocalVariable,
    ParameterVariable,
    Section,
    SourceFile,
    SymbolSource,
}

/// A strongly typed handle to a symbol.
///
/// Handles are unique for the lifetime of the list that issued them and are
/// never reused, which solves the problem of dangling references to symbols.
/// Note that holding a valid-looking handle doesn't guarantee the symbol it
/// points to hasn't been destroyed.
pub struct SymbolHandle<T> {
    value: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> SymbolHandle<T> {
    pub(crate) fn new(value: u32) -> Self {
        Self {
            value,
            marker: PhantomData,
        }
    }

    pub fn value(self) -> u32 {
        self.value
    }
}

impl<T> Clone for SymbolHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SymbolHandle<T> {}

impl<T> PartialEq for SymbolHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for SymbolHandle<T> {}

impl<T> PartialOrd for SymbolHandle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for SymbolHandle<T> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T> core::hash::Hash for SymbolHandle<T> {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> fmt::Debug for SymbolHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolHandle({})", self.value)
    }
}

pub type DataTypeHandle = SymbolHandle<DataType>;
pub type FunctionHandle = SymbolHandle<Function>;
pub type GlobalVariableHandle = SymbolHandle<GlobalVariable>;
pub type LabelHandle = SymbolHandle<Label>;
pub type LocalVariableHandle = SymbolHandle<LocalVariable>;
pub type ParameterVariableHandle = SymbolHandle<ParameterVariable>;
pub type SectionHandle = SymbolHandle<Section>;
pub type SourceFileHandle = SymbolHandle<SourceFile>;
pub type SymbolSourceHandle = SymbolHandle<SymbolSource>;

/// An inclusive range of symbol handles.
///
/// `last` points at the last real element in the range. Lookups through a
/// range tolerate endpoints that have since been destroyed.
pub struct SymbolRange<T> {
    pub first: SymbolHandle<T>,
    pub last: SymbolHandle<T>,
}

impl<T> SymbolRange<T> {
    pub fn single(handle: SymbolHandle<T>) -> Self {
        Self {
            first: handle,
            last: handle,
        }
    }
}

impl<T> Clone for SymbolRange<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SymbolRange<T> {}

impl<T> PartialEq for SymbolRange<T> {
    fn eq(&self, other: &Self) -> bool {
        self.first == other.first && self.last == other.last
    }
}

impl<T> Eq for SymbolRange<T> {}

impl<T> fmt::Debug for SymbolRange<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolRange({}..={})", self.first.value, self.last.value)
    }
}

/// Grow `range` to include `handle`. Handles must be added in ascending
/// order.
pub fn expand_to_include<T>(range: &mut Option<SymbolRange<T>>, handle: SymbolHandle<T>) {
    match range {
        None => *range = Some(SymbolRange::single(handle)),
        Some(range) => {
            debug_assert!(range.last.value < handle.value);
            range.last = handle;
        }
    }
}

/// The state shared by all symbol kinds.
#[derive(Debug)]
pub struct SymbolBase {
    handle: u32,
    source: u32,
    name: String,
    address: Option<u32>,
    size: u32,
    ty: Option<Box<Node>>,
    generation: u32,
}

impl Default for SymbolBase {
    fn default() -> Self {
        Self {
            handle: u32::MAX,
            source: u32::MAX,
            name: String::new(),
            address: None,
            size: 0,
            ty: None,
            generation: 0,
        }
    }
}

/// Implemented by everything that can be stored in a [`SymbolList`].
pub trait Symbol: Default {
    const DESCRIPTOR: SymbolDescriptor;
    const KIND_NAME: &'static str;
    const HAS_ADDRESS_MAP: bool;
    const HAS_NAME_MAP: bool;

    fn base(&self) -> &SymbolBase;
    fn base_mut(&mut self) -> &mut SymbolBase;

    fn handle(&self) -> SymbolHandle<Self> {
        SymbolHandle::new(self.base().handle)
    }

    fn raw_handle(&self) -> u32 {
        self.base().handle
    }

    fn name(&self) -> &str {
        &self.base().name
    }

    fn source(&self) -> SymbolSourceHandle {
        SymbolHandle::new(self.base().source)
    }

    fn address(&self) -> Option<u32> {
        self.base().address
    }

    fn size(&self) -> u32 {
        self.base().size
    }

    fn set_size(&mut self, size: u32) {
        self.base_mut().size = size;
    }

    fn ty(&self) -> Option<&Node> {
        self.base().ty.as_deref()
    }

    /// Mutable access to the type for in-place annotation passes. This does
    /// not count as a replacement, so node handles stay valid.
    fn ty_mut(&mut self) -> Option<&mut Node> {
        self.base_mut().ty.as_deref_mut()
    }

    /// The generation is bumped every time the type is replaced, which
    /// invalidates outstanding node handles.
    fn generation(&self) -> u32 {
        self.base().generation
    }

    /// Replace the type. Node handles pointing into this symbol stop
    /// resolving after this call.
    fn set_type(&mut self, ty: Box<Node>) {
        let base = self.base_mut();
        base.ty = Some(ty);
        base.generation = base.generation.wrapping_add(1);
    }
}

macro_rules! impl_symbol {
    ($type: ty, $descriptor: ident, $kind_name: literal, $has_address_map: literal, $has_name_map: literal) => {
        impl Symbol for $type {
            const DESCRIPTOR: SymbolDescriptor = SymbolDescriptor::$descriptor;
            const KIND_NAME: &'static str = $kind_name;
            const HAS_ADDRESS_MAP: bool = $has_address_map;
            const HAS_NAME_MAP: bool = $has_name_map;

            fn base(&self) -> &SymbolBase {
                &self.base
            }

            fn base_mut(&mut self) -> &mut SymbolBase {
                &mut self.base
            }
        }
    };
}

/// Where a variable is stored at runtime.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum GlobalStorageLocation {
    #[default]
    Nil,
    Data,
    Bss,
    Abs,
    Sdata,
    Sbss,
    Rdata,
    Common,
    Scommon,
    Sundefined,
}

impl fmt::Display for GlobalStorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let string = match self {
            Self::Nil => "nil",
            Self::Data => "data",
            Self::Bss => "bss",
            Self::Abs => "abs",
            Self::Sdata => "sdata",
            Self::Sbss => "sbss",
            Self::Rdata => "rdata",
            Self::Common => "common",
            Self::Scommon => "scommon",
            Self::Sundefined => "sundefined",
        };
        f.write_str(string)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct GlobalStorage {
    pub location: GlobalStorageLocation,
    pub address: Option<u32>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct RegisterStorage {
    pub dbx_register_number: i32,
    pub is_by_reference: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct StackStorage {
    /// Relative to the callee's stack pointer.
    pub stack_pointer_offset: i32,
}

/// Storage for local variables. This is different to whether the variable is
/// a global, local or parameter: local variables can have global storage
/// (static locals).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VariableStorage {
    Global(GlobalStorage),
    Register(RegisterStorage),
    Stack(StackStorage),
}

impl Default for VariableStorage {
    fn default() -> Self {
        Self::Global(GlobalStorage::default())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParameterStorage {
    Register(RegisterStorage),
    Stack(StackStorage),
}

impl Default for ParameterStorage {
    fn default() -> Self {
        Self::Register(RegisterStorage::default())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct AddressRange {
    pub low: Option<u32>,
    pub high: Option<u32>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LineNumberPair {
    pub address: u32,
    pub line_number: i32,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SubSourceFile {
    pub address: u32,
    pub relative_path: String,
}

/// A top-level type, deduplicated across translation units.
#[derive(Debug, Default)]
pub struct DataType {
    base: SymbolBase,
    /// The files in which this type is present.
    pub files: Vec<SourceFileHandle>,
    pub compare_fail_reason: Option<&'static str>,
    pub only_defined_in_single_translation_unit: bool,
    pub not_defined_in_any_translation_unit: bool,
}

impl_symbol!(DataType, DataType, "data type", false, true);

#[derive(Debug, Default)]
pub struct Function {
    base: SymbolBase,
    pub storage_class: StorageClass,
    pub relative_path: Option<String>,
    pub line_numbers: Vec<LineNumberPair>,
    pub sub_source_files: Vec<SubSourceFile>,
    /// Filled in by [`crate::link_member_functions`].
    pub is_member_function_ish: bool,
    mangled_name: Option<String>,
    source_file: Option<SourceFileHandle>,
    parameter_variables: Option<SymbolRange<ParameterVariable>>,
    local_variables: Option<SymbolRange<LocalVariable>>,
}

impl_symbol!(Function, Function, "function", true, true);

impl Function {
    pub fn source_file(&self) -> Option<SourceFileHandle> {
        self.source_file
    }

    pub fn parameter_variables(&self) -> Option<SymbolRange<ParameterVariable>> {
        self.parameter_variables
    }

    pub fn local_variables(&self) -> Option<SymbolRange<LocalVariable>> {
        self.local_variables
    }

    pub fn mangled_name(&self) -> &str {
        self.mangled_name.as_deref().unwrap_or_else(|| self.name())
    }

    pub fn set_mangled_name(&mut self, mangled: String) {
        self.mangled_name = Some(mangled);
    }
}

#[derive(Debug, Default)]
pub struct GlobalVariable {
    base: SymbolBase,
    pub storage: GlobalStorage,
    pub storage_class: StorageClass,
    mangled_name: Option<String>,
    source_file: Option<SourceFileHandle>,
}

impl_symbol!(GlobalVariable, GlobalVariable, "global variable", true, true);

impl GlobalVariable {
    pub fn source_file(&self) -> Option<SourceFileHandle> {
        self.source_file
    }

    pub fn mangled_name(&self) -> &str {
        self.mangled_name.as_deref().unwrap_or_else(|| self.name())
    }

    pub fn set_mangled_name(&mut self, mangled: String) {
        self.mangled_name = Some(mangled);
    }
}

#[derive(Debug, Default)]
pub struct Label {
    base: SymbolBase,
}

impl_symbol!(Label, Label, "label", true, false);

#[derive(Debug, Default)]
pub struct LocalVariable {
    base: SymbolBase,
    pub storage: VariableStorage,
    pub live_range: AddressRange,
    function: Option<FunctionHandle>,
}

impl_symbol!(LocalVariable, LocalVariable, "local variable", true, false);

impl LocalVariable {
    pub fn function(&self) -> Option<FunctionHandle> {
        self.function
    }
}

#[derive(Debug, Default)]
pub struct ParameterVariable {
    base: SymbolBase,
    pub storage: ParameterStorage,
    function: Option<FunctionHandle>,
}

impl_symbol!(
    ParameterVariable,
    ParameterVariable,
    "parameter variable",
    false,
    false
);

impl ParameterVariable {
    pub fn function(&self) -> Option<FunctionHandle> {
        self.function
    }
}

#[derive(Debug, Default)]
pub struct Section {
    base: SymbolBase,
}

impl_symbol!(Section, Section, "section", true, true);

#[derive(Debug, Default)]
pub struct SourceFile {
    base: SymbolBase,
    pub relative_path: String,
    pub working_dir: String,
    pub command_line_path: String,
    pub text_address: u32,
    pub stabs_type_number_to_handle: BTreeMap<TypeNum, DataTypeHandle>,
    pub toolchain_version_info: BTreeSet<String>,
    functions: Option<SymbolRange<Function>>,
    global_variables: Option<SymbolRange<GlobalVariable>>,
}

impl_symbol!(SourceFile, SourceFile, "source file", false, false);

impl SourceFile {
    /// The full path of the source file, canonicalized at import time.
    pub fn full_path(&self) -> &str {
        self.name()
    }

    pub fn functions(&self) -> Option<SymbolRange<Function>> {
        self.functions
    }

    pub fn global_variables(&self) -> Option<SymbolRange<GlobalVariable>> {
        self.global_variables
    }
}

/// Tags the origin of a group of symbols, so an entire symbol table can be
/// destroyed without touching symbols from other origins.
#[derive(Debug, Default)]
pub struct SymbolSource {
    base: SymbolBase,
}

impl_symbol!(SymbolSource, SymbolSource, "symbol source", false, false);

/// Whether a replaced symbol range should also destroy the symbols it used
/// to contain.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ShouldDeleteOldSymbols {
    DontDeleteOldSymbols,
    DeleteOldSymbols,
}

/// A container for symbols of a given kind, ordered by handle, with optional
/// address and name indexes kept in sync.
pub struct SymbolList<T> {
    symbols: Vec<T>,
    next_handle: u32,
    address_map: HashMap<u32, Vec<SymbolHandle<T>>>,
    name_map: HashMap<String, Vec<SymbolHandle<T>>>,
}

impl<T> Default for SymbolList<T> {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            next_handle: 0,
            address_map: HashMap::new(),
            name_map: HashMap::new(),
        }
    }
}

impl<T: Symbol> SymbolList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_of(&self, handle: SymbolHandle<T>) -> Option<usize> {
        self.symbols
            .binary_search_by(|symbol| symbol.base().handle.cmp(&handle.value))
            .ok()
    }

    /// Lookup a symbol from its handle using binary search.
    pub fn symbol_from_handle(&self, handle: SymbolHandle<T>) -> Option<&T> {
        self.index_of(handle).map(|index| &self.symbols[index])
    }

    pub fn symbol_from_handle_mut(&mut self, handle: SymbolHandle<T>) -> Option<&mut T> {
        let index = self.index_of(handle)?;
        Some(&mut self.symbols[index])
    }

    pub fn iter(&self) -> core::slice::Iter<'_, T> {
        self.symbols.iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, T> {
        self.symbols.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    fn span_bounds(&self, range: SymbolRange<T>) -> (usize, usize) {
        let begin = self
            .symbols
            .partition_point(|symbol| symbol.base().handle < range.first.value);
        let end = self
            .symbols
            .partition_point(|symbol| symbol.base().handle <= range.last.value);
        (begin, end.max(begin))
    }

    /// A contiguous view over the symbols in `range`, clamped if an endpoint
    /// no longer exists.
    pub fn span(&self, range: Option<SymbolRange<T>>) -> &[T] {
        match range {
            Some(range) => {
                let (begin, end) = self.span_bounds(range);
                &self.symbols[begin..end]
            }
            None => &[],
        }
    }

    pub fn span_mut(&mut self, range: Option<SymbolRange<T>>) -> &mut [T] {
        match range {
            Some(range) => {
                let (begin, end) = self.span_bounds(range);
                &mut self.symbols[begin..end]
            }
            None => &mut [],
        }
    }

    /// All the handles of symbols at `address`, in insertion order.
    pub fn handles_from_address(&self, address: u32) -> &[SymbolHandle<T>] {
        self.address_map
            .get(&address)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All the handles of symbols called `name`, in insertion order.
    pub fn handles_from_name(&self, name: &str) -> &[SymbolHandle<T>] {
        self.name_map.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first_handle_from_starting_address(&self, address: u32) -> Option<SymbolHandle<T>> {
        self.handles_from_address(address).first().copied()
    }

    pub fn first_handle_from_name(&self, name: &str) -> Option<SymbolHandle<T>> {
        self.handles_from_name(name).first().copied()
    }

    /// Create a new symbol. `source` can only be omitted for symbol sources,
    /// which become their own source.
    pub fn create_symbol(
        &mut self,
        name: impl Into<String>,
        source: Option<SymbolSourceHandle>,
        address: Option<u32>,
    ) -> Result<&mut T> {
        if self.next_handle == u32::MAX {
            return Err(Error::HandleOverflow(T::KIND_NAME));
        }
        let handle = self.next_handle;
        self.next_handle += 1;

        let mut symbol = T::default();
        let base = symbol.base_mut();
        base.handle = handle;
        base.name = name.into();
        base.address = address;
        base.source = match source {
            Some(source) => source.value(),
            None => {
                debug_assert!(T::DESCRIPTOR == SymbolDescriptor::SymbolSource);
                handle
            }
        };

        if T::HAS_ADDRESS_MAP {
            if let Some(address) = base.address {
                self.address_map
                    .entry(address)
                    .or_default()
                    .push(SymbolHandle::new(handle));
            }
        }
        if T::HAS_NAME_MAP {
            self.name_map
                .entry(base.name.clone())
                .or_default()
                .push(SymbolHandle::new(handle));
        }

        self.symbols.push(symbol);
        let index = self.symbols.len() - 1;
        Ok(&mut self.symbols[index])
    }

    /// Update the address of a symbol without changing its handle.
    pub fn move_symbol(&mut self, handle: SymbolHandle<T>, new_address: Option<u32>) -> bool {
        let Some(index) = self.index_of(handle) else {
            return false;
        };
        let old_address = self.symbols[index].base().address;
        if old_address == new_address {
            return true;
        }
        if T::HAS_ADDRESS_MAP {
            if let Some(old_address) = old_address {
                unlink_multimap(&mut self.address_map, old_address, handle);
            }
            if let Some(new_address) = new_address {
                self.address_map
                    .entry(new_address)
                    .or_default()
                    .push(handle);
            }
        }
        self.symbols[index].base_mut().address = new_address;
        true
    }

    /// Update the name of a symbol without changing its handle.
    pub fn rename_symbol(&mut self, handle: SymbolHandle<T>, new_name: impl Into<String>) -> bool {
        let Some(index) = self.index_of(handle) else {
            return false;
        };
        let new_name = new_name.into();
        if self.symbols[index].base().name == new_name {
            return true;
        }
        if T::HAS_NAME_MAP {
            let old_name = self.symbols[index].base().name.clone();
            unlink_multimap_by_key(&mut self.name_map, &old_name, handle);
            self.name_map
                .entry(new_name.clone())
                .or_default()
                .push(handle);
        }
        self.symbols[index].base_mut().name = new_name;
        true
    }

    pub fn destroy_symbol(&mut self, handle: SymbolHandle<T>) -> bool {
        self.destroy_symbols(SymbolRange::single(handle)) == 1
    }

    /// Destroy all the symbols in `range`. Handles are not reused.
    pub fn destroy_symbols(&mut self, range: SymbolRange<T>) -> u32 {
        if range.last.value < range.first.value {
            return 0;
        }
        let (begin, end) = self.span_bounds(range);
        self.destroy_symbols_by_index(begin, end)
    }

    /// Destroy all the symbols from a given symbol source. For example, this
    /// can free an entire symbol table without destroying user-defined
    /// symbols.
    pub fn destroy_symbols_from_source(&mut self, source: SymbolSourceHandle) {
        let mut index = 0;
        while index < self.symbols.len() {
            if self.symbols[index].base().source == source.value() {
                let mut end = index + 1;
                while end < self.symbols.len() && self.symbols[end].base().source == source.value()
                {
                    end += 1;
                }
                self.destroy_symbols_by_index(index, end);
            } else {
                index += 1;
            }
        }
    }

    /// Destroy all symbols, but keep issuing fresh handles so outstanding
    /// ones can't be confused with new symbols.
    pub fn clear(&mut self) {
        self.symbols.clear();
        self.address_map.clear();
        self.name_map.clear();
    }

    fn destroy_symbols_by_index(&mut self, begin: usize, end: usize) -> u32 {
        for index in begin..end {
            let handle = self.symbols[index].handle();
            if T::HAS_ADDRESS_MAP {
                if let Some(address) = self.symbols[index].base().address {
                    unlink_multimap(&mut self.address_map, address, handle);
                }
            }
            if T::HAS_NAME_MAP {
                let name = self.symbols[index].base().name.clone();
                unlink_multimap_by_key(&mut self.name_map, &name, handle);
            }
        }
        self.symbols.drain(begin..end);
        (end - begin) as u32
    }

    pub(crate) fn take_type(&mut self, handle: SymbolHandle<T>) -> Option<Box<Node>> {
        self.symbol_from_handle_mut(handle)?.base_mut().ty.take()
    }

    /// Put back a type taken with [`SymbolList::take_type`] without bumping
    /// the generation.
    pub(crate) fn restore_type(&mut self, handle: SymbolHandle<T>, ty: Box<Node>) {
        if let Some(symbol) = self.symbol_from_handle_mut(handle) {
            symbol.base_mut().ty = Some(ty);
        }
    }

    pub(crate) fn handles(&self) -> Vec<SymbolHandle<T>> {
        self.symbols.iter().map(|symbol| symbol.handle()).collect()
    }
}

fn unlink_multimap<T>(
    map: &mut HashMap<u32, Vec<SymbolHandle<T>>>,
    key: u32,
    handle: SymbolHandle<T>,
) {
    if let Some(handles) = map.get_mut(&key) {
        handles.retain(|h| *h != handle);
        if handles.is_empty() {
            map.remove(&key);
        }
    }
}

fn unlink_multimap_by_key<T>(
    map: &mut HashMap<String, Vec<SymbolHandle<T>>>,
    key: &str,
    handle: SymbolHandle<T>,
) {
    if let Some(handles) = map.get_mut(key) {
        handles.retain(|h| *h != handle);
        if handles.is_empty() {
            map.remove(key);
        }
    }
}

impl<'a, T: Symbol> IntoIterator for &'a SymbolList<T> {
    type Item = &'a T;
    type IntoIter = core::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.symbols.iter()
    }
}

/// A generation-checked reference to a node inside a symbol's type tree.
///
/// This is the only safe way to retain a long-lived reference to a subtree,
/// because type deduplication may replace the tree at any point. The path is
/// a list of child indices starting at the root node.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NodeHandle {
    descriptor: SymbolDescriptor,
    symbol_handle: u32,
    path: Vec<u32>,
    generation: u32,
}

impl NodeHandle {
    pub fn new<T: Symbol>(symbol: &T, path: Vec<u32>) -> Self {
        Self {
            descriptor: T::DESCRIPTOR,
            symbol_handle: symbol.raw_handle(),
            path,
            generation: symbol.generation(),
        }
    }

    /// A handle to the root node of the symbol's type tree.
    pub fn root<T: Symbol>(symbol: &T) -> Self {
        Self::new(symbol, Vec::new())
    }
}

/// The symbol database itself. This owns all the symbols.
///
/// One database is mutated by exactly one importer at a time; there are no
/// internal locks.
#[derive(Default)]
pub struct SymbolDatabase {
    pub data_types: SymbolList<DataType>,
    pub functions: SymbolList<Function>,
    pub global_variables: SymbolList<GlobalVariable>,
    pub labels: SymbolList<Label>,
    pub local_variables: SymbolList<LocalVariable>,
    pub parameter_variables: SymbolList<ParameterVariable>,
    pub sections: SymbolList<Section>,
    pub source_files: SymbolList<SourceFile>,
    pub symbol_sources: SymbolList<SymbolSource>,
}

impl SymbolDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if any symbol has been added to the database at `address`.
    pub fn symbol_exists_at_address(&self, address: u32) -> bool {
        self.functions
            .first_handle_from_starting_address(address)
            .is_some()
            || self
                .global_variables
                .first_handle_from_starting_address(address)
                .is_some()
            || self
                .labels
                .first_handle_from_starting_address(address)
                .is_some()
            || self
                .local_variables
                .first_handle_from_starting_address(address)
                .is_some()
            || self
                .sections
                .first_handle_from_starting_address(address)
                .is_some()
    }

    /// Destroy all the symbols in the database.
    pub fn clear(&mut self) {
        self.data_types.clear();
        self.functions.clear();
        self.global_variables.clear();
        self.labels.clear();
        self.local_variables.clear();
        self.parameter_variables.clear();
        self.sections.clear();
        self.source_files.clear();
        self.symbol_sources.clear();
    }

    /// Destroy all the symbols from a given symbol source.
    pub fn destroy_symbols_from_source(&mut self, source: SymbolSourceHandle) {
        self.data_types.destroy_symbols_from_source(source);
        self.functions.destroy_symbols_from_source(source);
        self.global_variables.destroy_symbols_from_source(source);
        self.labels.destroy_symbols_from_source(source);
        self.local_variables.destroy_symbols_from_source(source);
        self.parameter_variables.destroy_symbols_from_source(source);
        self.sections.destroy_symbols_from_source(source);
        self.source_files.destroy_symbols_from_source(source);
        self.symbol_sources.destroy_symbols_from_source(source);
    }

    /// Destroy a function as well as all the parameter and local variables
    /// associated with it.
    pub fn destroy_function(&mut self, handle: FunctionHandle) -> bool {
        let Some(function) = self.functions.symbol_from_handle(handle) else {
            return false;
        };
        let parameter_variables = function.parameter_variables;
        let local_variables = function.local_variables;
        if let Some(range) = parameter_variables {
            self.parameter_variables.destroy_symbols(range);
        }
        if let Some(range) = local_variables {
            self.local_variables.destroy_symbols(range);
        }
        self.functions.destroy_symbol(handle)
    }

    /// Check if the symbol referenced by a node handle still exists with an
    /// unchanged generation. If it does, return the node, otherwise `None`.
    pub fn node_from_handle(&self, handle: &NodeHandle) -> Option<&Node> {
        let (generation, root): (u32, &Node) = match handle.descriptor {
            SymbolDescriptor::DataType => {
                let symbol = self
                    .data_types
                    .symbol_from_handle(SymbolHandle::new(handle.symbol_handle))?;
                (symbol.generation(), symbol.ty()?)
            }
            SymbolDescriptor::Function => {
                let symbol = self
                    .functions
                    .symbol_from_handle(SymbolHandle::new(handle.symbol_handle))?;
                (symbol.generation(), symbol.ty()?)
            }
            SymbolDescriptor::GlobalVariable => {
                let symbol = self
                    .global_variables
                    .symbol_from_handle(SymbolHandle::new(handle.symbol_handle))?;
                (symbol.generation(), symbol.ty()?)
            }
            SymbolDescriptor::Label => {
                let symbol = self
                    .labels
                    .symbol_from_handle(SymbolHandle::new(handle.symbol_handle))?;
                (symbol.generation(), symbol.ty()?)
            }
            SymbolDescriptor::LocalVariable => {
                let symbol = self
                    .local_variables
                    .symbol_from_handle(SymbolHandle::new(handle.symbol_handle))?;
                (symbol.generation(), symbol.ty()?)
            }
            SymbolDescriptor::ParameterVariable => {
                let symbol = self
                    .parameter_variables
                    .symbol_from_handle(SymbolHandle::new(handle.symbol_handle))?;
                (symbol.generation(), symbol.ty()?)
            }
            SymbolDescriptor::Section => {
                let symbol = self
                    .sections
                    .symbol_from_handle(SymbolHandle::new(handle.symbol_handle))?;
                (symbol.generation(), symbol.ty()?)
            }
            SymbolDescriptor::SourceFile => {
                let symbol = self
                    .source_files
                    .symbol_from_handle(SymbolHandle::new(handle.symbol_handle))?;
                (symbol.generation(), symbol.ty()?)
            }
            SymbolDescriptor::SymbolSource => {
                let symbol = self
                    .symbol_sources
                    .symbol_from_handle(SymbolHandle::new(handle.symbol_handle))?;
                (symbol.generation(), symbol.ty()?)
            }
        };
        if generation != handle.generation {
            return None;
        }
        let mut node = root;
        for &index in &handle.path {
            node = node.child(index as usize)?;
        }
        Some(node)
    }

    /// Attach a range of parameter variables to a function, back-pointing
    /// each of them at it.
    pub fn set_function_parameter_variables(
        &mut self,
        function: FunctionHandle,
        range: Option<SymbolRange<ParameterVariable>>,
        delete_old_symbols: ShouldDeleteOldSymbols,
    ) {
        if delete_old_symbols == ShouldDeleteOldSymbols::DeleteOldSymbols {
            if let Some(function) = self.functions.symbol_from_handle(function) {
                if let Some(old_range) = function.parameter_variables {
                    self.parameter_variables.destroy_symbols(old_range);
                }
            }
        }
        for parameter_variable in self.parameter_variables.span_mut(range) {
            parameter_variable.function = Some(function);
        }
        if let Some(function) = self.functions.symbol_from_handle_mut(function) {
            function.parameter_variables = range;
        }
    }

    /// Attach a range of local variables to a function, back-pointing each
    /// of them at it.
    pub fn set_function_local_variables(
        &mut self,
        function: FunctionHandle,
        range: Option<SymbolRange<LocalVariable>>,
        delete_old_symbols: ShouldDeleteOldSymbols,
    ) {
        if delete_old_symbols == ShouldDeleteOldSymbols::DeleteOldSymbols {
            if let Some(function) = self.functions.symbol_from_handle(function) {
                if let Some(old_range) = function.local_variables {
                    self.local_variables.destroy_symbols(old_range);
                }
            }
        }
        for local_variable in self.local_variables.span_mut(range) {
            local_variable.function = Some(function);
        }
        if let Some(function) = self.functions.symbol_from_handle_mut(function) {
            function.local_variables = range;
        }
    }

    /// Attach a range of functions to a source file, back-pointing each of
    /// them at it.
    pub fn set_source_file_functions(
        &mut self,
        source_file: SourceFileHandle,
        range: Option<SymbolRange<Function>>,
        delete_old_symbols: ShouldDeleteOldSymbols,
    ) {
        if delete_old_symbols == ShouldDeleteOldSymbols::DeleteOldSymbols {
            if let Some(source_file) = self.source_files.symbol_from_handle(source_file) {
                if let Some(old_range) = source_file.functions {
                    self.functions.destroy_symbols(old_range);
                }
            }
        }
        for function in self.functions.span_mut(range) {
            function.source_file = Some(source_file);
        }
        if let Some(source_file) = self.source_files.symbol_from_handle_mut(source_file) {
            source_file.functions = range;
        }
    }

    /// Attach a range of global variables to a source file, back-pointing
    /// each of them at it.
    pub fn set_source_file_global_variables(
        &mut self,
        source_file: SourceFileHandle,
        range: Option<SymbolRange<GlobalVariable>>,
        delete_old_symbols: ShouldDeleteOldSymbols,
    ) {
        if delete_old_symbols == ShouldDeleteOldSymbols::DeleteOldSymbols {
            if let Some(source_file) = self.source_files.symbol_from_handle(source_file) {
                if let Some(old_range) = source_file.global_variables {
                    self.global_variables.destroy_symbols(old_range);
                }
            }
        }
        for global_variable in self.global_variables.span_mut(range) {
            global_variable.source_file = Some(source_file);
        }
        if let Some(source_file) = self.source_files.symbol_from_handle_mut(source_file) {
            source_file.global_variables = range;
        }
    }

    /// Add a data type unless a matching one with the same name already
    /// exists, in which case the two are merged.
    ///
    /// Returns the handle of a newly created data type, or `None` if the new
    /// node was merged into an existing one. When the new node is strictly
    /// better than the old one it replaces the old tree, invalidating node
    /// handles pointing into it.
    pub fn create_data_type_if_unique(
        &mut self,
        node: Box<Node>,
        number: Option<TypeNum>,
        name: &str,
        source_file: SourceFileHandle,
        source: SymbolSourceHandle,
    ) -> Result<Option<DataTypeHandle>> {
        let existing_handles = self.data_types.handles_from_name(name).to_vec();
        let mut compare_fail_reason = None;

        let mut node = node;
        for existing_handle in existing_handles {
            let Some(existing) = self.data_types.symbol_from_handle(existing_handle) else {
                continue;
            };
            // Types from different sources are not merged, so that all the
            // types from one source can be destroyed without breaking
            // anything else.
            if existing.source() != source {
                continue;
            }
            let Some(existing_node) = existing.ty() else {
                continue;
            };

            let result = compare_nodes(existing_node, &node, self, true);
            let is_anonymous_enum =
                matches!(existing_node.kind, NodeKind::Enum { .. }) && existing.name().is_empty();

            if result.kind == CompareResultKind::Differs {
                // The new node doesn't match this existing node.
                if !is_anonymous_enum {
                    let reason = result.fail_reason.map(compare_fail_reason_to_string);
                    compare_fail_reason = reason;
                    if let Some(existing) = self.data_types.symbol_from_handle_mut(existing_handle)
                    {
                        existing.compare_fail_reason = reason;
                    }
                }
            } else {
                // The new node matches this existing node.
                let favour_rhs = result.kind == CompareResultKind::MatchesFavourRhs;
                if let Some(existing) = self.data_types.symbol_from_handle_mut(existing_handle) {
                    existing.files.push(source_file);
                    if favour_rhs {
                        // The new node is slightly better than the old one,
                        // so replace it.
                        existing.set_type(node);
                    }
                }
                if let (Some(number), Some(source_file)) =
                    (number, self.source_files.symbol_from_handle_mut(source_file))
                {
                    source_file
                        .stabs_type_number_to_handle
                        .insert(number, existing_handle);
                }
                return Ok(None);
            }
        }

        // This type doesn't match any of the types with the same name that
        // have already been processed, so create a new one.
        node.stabs_type_number = number.or(node.stabs_type_number);
        let data_type = self.data_types.create_symbol(name, Some(source), None)?;
        data_type.files = vec![source_file];
        data_type.compare_fail_reason = compare_fail_reason;
        data_type.set_type(node);
        let handle = data_type.handle();

        if let (Some(number), Some(source_file)) =
            (number, self.source_files.symbol_from_handle_mut(source_file))
        {
            source_file
                .stabs_type_number_to_handle
                .insert(number, handle);
        }

        Ok(Some(handle))
    }
}
