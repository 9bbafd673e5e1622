//! Tests for the whole STABS parsing and analysis pipeline. The symbol
//! streams are based on real compiler outputs from ee-g++, iop-gcc and the
//! old homebrew toolchain (GCC 3.2.3), except where otherwise stated.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use mipsym::finish_import;
use mipsym::import_file;
use mipsym::import_symbol_table;
use mipsym::link_member_functions;
use mipsym::mdebug_section::File;
use mipsym::mdebug_section::StabsCode;
use mipsym::mdebug_section::SymbolTableReader;
use mipsym::mdebug_section::MDEBUG_MAGIC;
use mipsym::AnalysisContext;
use mipsym::BuiltInClass;
use mipsym::Error;
use mipsym::ImportOptions;
use mipsym::ImporterFlags;
use mipsym::NodeHandle;
use mipsym::NodeKind;
use mipsym::StorageClass;
use mipsym::Symbol;
use mipsym::SymbolClass;
use mipsym::SymbolDatabase;
use mipsym::SymbolType;
use mipsym::VariableStorage;

use mipsym::mdebug_section::Symbol as Record;

fn lsym(string: &str) -> Record {
    Record::stabs(StabsCode::Lsym, SymbolType::Nil, SymbolClass::Nil, 0, string)
}

fn psym(value: i32, string: &str) -> Record {
    Record::stabs(
        StabsCode::Psym,
        SymbolType::Nil,
        SymbolClass::Nil,
        value,
        string,
    )
}

fn lbrac(value: i32) -> Record {
    Record::stabs(
        StabsCode::Lbrac,
        SymbolType::Nil,
        SymbolClass::Nil,
        value,
        "",
    )
}

fn rbrac(value: i32) -> Record {
    Record::stabs(
        StabsCode::Rbrac,
        SymbolType::Nil,
        SymbolClass::Nil,
        value,
        "",
    )
}

fn label(line_number: u32, value: i32, string: &str) -> Record {
    Record::non_stabs(SymbolType::Label, SymbolClass::Text, line_number, value, string)
}

fn run_importer_with_options(
    symbols: Vec<Record>,
    flags: ImporterFlags,
    demangler: Option<&mipsym::DemanglerFn>,
) -> SymbolDatabase {
    let mut database = SymbolDatabase::new();
    let source = database
        .symbol_sources
        .create_symbol("test", None, None)
        .unwrap()
        .handle();
    let context = AnalysisContext {
        globals: None,
        source,
        flags: flags | ImporterFlags::DONT_DEDUPLICATE_SYMBOLS,
        demangler,
        interrupt: None,
    };
    let file = File::with_symbols(symbols);
    import_file(&mut database, &file, &context).unwrap();
    finish_import(&mut database, &context).unwrap();
    database
}

fn run_importer(symbols: Vec<Record>) -> SymbolDatabase {
    run_importer_with_options(symbols, ImporterFlags::STRICT_PARSING, None)
}

fn data_type_by_name<'a>(
    database: &'a SymbolDatabase,
    name: &str,
) -> &'a mipsym::DataType {
    let handle = database
        .data_types
        .first_handle_from_name(name)
        .unwrap_or_else(|| panic!("no data type called {name}"));
    database.data_types.symbol_from_handle(handle).unwrap()
}

// ee-g++ -gstabs
// enum Enum {};
#[test]
fn empty_enum_with_tag() {
    let database = run_importer(vec![lsym("Enum:t(1,1)=e;")]);
    assert_eq!(1, database.data_types.len());
    let data_type = data_type_by_name(&database, "Enum");
    let node = data_type.ty().unwrap();
    assert!(matches!(node.kind, NodeKind::Enum { .. }));
    assert_eq!(StorageClass::None, node.storage_class);
}

// ee-g++ -gstabs
// typedef enum NamedTypedefedEnum {} NamedTypedefedEnum;
#[test]
fn named_typedefed_enum() {
    let database = run_importer(vec![
        lsym("Enum:t(1,1)=e;"),
        lsym("Enum:t(1,2)=(1,1)"),
    ]);
    assert_eq!(1, database.data_types.len());
    let data_type = data_type_by_name(&database, "Enum");
    let node = data_type.ty().unwrap();
    assert!(matches!(node.kind, NodeKind::Enum { .. }));
    assert_eq!(StorageClass::Typedef, node.storage_class);
}

// Synthetic example. Something like:
// typedef enum {} ErraticEnum;
#[test]
fn anonymous_enum_typedef() {
    let database = run_importer(vec![
        lsym(" :T(1,1)=e;"),
        lsym("ErraticEnum:t(1,2)=(1,1)"),
    ]);
    assert_eq!(1, database.data_types.len());
    let data_type = data_type_by_name(&database, "ErraticEnum");
    let node = data_type.ty().unwrap();
    assert!(matches!(node.kind, NodeKind::Enum { .. }));
    assert_eq!(StorageClass::Typedef, node.storage_class);
}

// ee-g++ -gstabs
// struct Struct {};
#[test]
fn struct_with_redundant_self_typedef() {
    let database = run_importer(vec![
        lsym("Struct:T(1,1)=s1;"),
        lsym("Struct:t(1,1)"),
    ]);
    assert_eq!(1, database.data_types.len());
    let data_type = data_type_by_name(&database, "Struct");
    let node = data_type.ty().unwrap();
    assert!(matches!(node.kind, NodeKind::StructOrUnion(_)));
    assert_eq!(StorageClass::None, node.storage_class);
}

// ee-g++ -gstabs
// typedef struct {} TypedefedStruct;
#[test]
fn typedefed_struct() {
    let database = run_importer(vec![lsym("TypedefedStruct:t(1,1)=s1;")]);
    assert_eq!(1, database.data_types.len());
    let data_type = data_type_by_name(&database, "TypedefedStruct");
    let node = data_type.ty().unwrap();
    assert!(matches!(node.kind, NodeKind::StructOrUnion(_)));
    assert_eq!(StorageClass::Typedef, node.storage_class);
}

// ee-g++ -gstabs
// typedef struct NamedTypedefedStruct {} NamedTypedefedStruct;
#[test]
fn named_typedefed_struct() {
    let database = run_importer(vec![
        lsym("NamedTypedefedStruct:T(1,1)=s1;"),
        lsym("NamedTypedefedStruct:t(1,1)"),
        lsym("NamedTypedefedStruct:t(1,2)=(1,1)"),
    ]);
    assert_eq!(1, database.data_types.len());
    let data_type = data_type_by_name(&database, "NamedTypedefedStruct");
    let node = data_type.ty().unwrap();
    assert!(matches!(node.kind, NodeKind::StructOrUnion(_)));
    assert_eq!(StorageClass::Typedef, node.storage_class);
}

// Synthetic example.
#[test]
fn vexing_void() {
    let database = run_importer(vec![lsym("VexingVoid:t1=1")]);
    assert_eq!(1, database.data_types.len());
    let data_type = data_type_by_name(&database, "VexingVoid");
    let node = data_type.ty().unwrap();
    assert!(matches!(
        node.kind,
        NodeKind::BuiltIn {
            class: BuiltInClass::Void
        }
    ));
}

// ee-g++ -gstabs
// typedef void* VillanousVoid;
#[test]
fn villanous_void() {
    let database = run_importer(vec![
        lsym("__builtin_va_list:t(0,22)=*(0,23)=(0,23)"),
        lsym("VillanousVoid:t(1,1)=(0,22)"),
    ]);
    assert_eq!(2, database.data_types.len());
    let data_type = data_type_by_name(&database, "VillanousVoid");
    let node = data_type.ty().unwrap();
    let NodeKind::PointerOrReference {
        is_pointer,
        value_type,
    } = &node.kind
    else {
        panic!("expected a pointer");
    };
    assert!(is_pointer);
    assert!(matches!(
        value_type.kind,
        NodeKind::BuiltIn {
            class: BuiltInClass::Void
        }
    ));
}

// ee-g++ -gstabs
// void SimpleFunction() {}
#[test]
fn simple_function() {
    let database = run_importer(vec![
        lsym("__builtin_va_list:t(0,22)=*(0,23)=(0,23)"),
        Record::stabs(
            StabsCode::Fun,
            SymbolType::Label,
            SymbolClass::Text,
            0,
            "_Z14SimpleFunctionv:F(0,23)",
        ),
        label(1, 0x00, "$LM1"),
        Record::non_stabs(SymbolType::Proc, SymbolClass::Text, 1, 0x00, "_Z14SimpleFunctionv"),
        label(1, 0x0c, "$LM2"),
        Record::non_stabs(SymbolType::End, SymbolClass::Text, 31, 0x20, "_Z14SimpleFunctionv"),
    ]);
    assert_eq!(1, database.functions.len());
    assert_eq!(0, database.parameter_variables.len());
    assert_eq!(0, database.local_variables.len());

    let handle = database
        .functions
        .first_handle_from_name("_Z14SimpleFunctionv")
        .unwrap();
    let function = database.functions.symbol_from_handle(handle).unwrap();
    assert_eq!(Some(0x00), function.address());
    assert_eq!(0x20, function.size());
    assert_eq!(2, function.line_numbers.len());
}

// iop-gcc -gstabs
// void SimpleFunctionIOP() {}
#[test]
fn simple_function_iop() {
    let database = run_importer(vec![
        lsym("__builtin_va_list:t21=*22=22"),
        label(1, 0x00, "$LM1"),
        Record::non_stabs(SymbolType::Proc, SymbolClass::Text, 1, 0x00, "SimpleFunctionIOP"),
        label(1, 0x0c, "$LM2"),
        Record::non_stabs(SymbolType::End, SymbolClass::Text, 27, 0x20, "SimpleFunctionIOP"),
        Record::stabs(
            StabsCode::Fun,
            SymbolType::Label,
            SymbolClass::Text,
            0,
            "SimpleFunctionIOP:F22",
        ),
    ]);
    assert_eq!(1, database.functions.len());
    assert!(database
        .functions
        .first_handle_from_name("SimpleFunctionIOP")
        .is_some());
}

fn complicated_function_symbols() -> Vec<Record> {
    vec![
        lsym("int:t(0,1)=r(0,1);-2147483648;2147483647;"),
        lsym("char:t(0,2)=r(0,2);0;127;"),
        lsym("float:t(0,14)=r(0,1);4;0;"),
        Record::stabs(
            StabsCode::Fun,
            SymbolType::Label,
            SymbolClass::Text,
            0,
            "_Z19ComplicatedFunctionifPc:F(0,1)",
        ),
        psym(0xffffffd0_u32 as i32, "a:p(0,1)"),
        psym(0xffffffd4_u32 as i32, "b:p(0,14)"),
        psym(0xffffffd8_u32 as i32, "c:p(1,1)=*(0,2)"),
        label(1, 0x00, "$LM1"),
        Record::non_stabs(
            SymbolType::Proc,
            SymbolClass::Text,
            1,
            0x00,
            "_Z19ComplicatedFunctionifPc",
        ),
        label(2, 0x18, "$LM2"),
        label(3, 0x48, "$LM3"),
        label(4, 0x88, "$LM4"),
        label(5, 0xe0, "$LM5"),
        label(6, 0xe8, "$LM6"),
        Record::non_stabs(
            SymbolType::End,
            SymbolClass::Text,
            34,
            0x100,
            "_Z19ComplicatedFunctionifPc",
        ),
        lsym_at(0xffffffdc_u32 as i32, "x:(0,1)"),
        lbrac(0x18),
        lsym_at(0xffffffe0_u32 as i32, "y:(0,1)"),
        lbrac(0x54),
        rbrac(0x88),
        lsym_at(0xffffffe0_u32 as i32, "i:(0,1)"),
        lbrac(0x88),
        lsym_at(0xffffffe4_u32 as i32, "z:(0,1)"),
        lbrac(0xa4),
        rbrac(0xcc),
        rbrac(0xe0),
        rbrac(0xe8),
    ]
}

fn lsym_at(value: i32, string: &str) -> Record {
    Record::stabs(
        StabsCode::Lsym,
        SymbolType::Nil,
        SymbolClass::Nil,
        value,
        string,
    )
}

// ee-g++ -gstabs
// int ComplicatedFunction(int a, float b, char* c) {
//     int x = b < 0;
//     if (a) { int y = b + *c; return y; }
//     for (int i = 0; i < 5; i++) { int z = b + i; x += z; }
//     return x;
// }
#[test]
fn complicated_function_with_locals_and_blocks() {
    let database = run_importer(complicated_function_symbols());
    assert_eq!(1, database.functions.len());
    assert_eq!(3, database.parameter_variables.len());
    assert_eq!(4, database.local_variables.len());

    let names: Vec<&str> = database
        .parameter_variables
        .iter()
        .map(|parameter| parameter.name())
        .collect();
    assert_eq!(vec!["a", "b", "c"], names);

    let find_local = |name: &str| {
        database
            .local_variables
            .iter()
            .find(|local| local.name() == name)
            .unwrap_or_else(|| panic!("no local called {name}"))
    };
    assert_eq!(Some(0x54), find_local("y").live_range.low);
    assert_eq!(Some(0x88), find_local("y").live_range.high);
    assert_eq!(Some(0xa4), find_local("z").live_range.low);
    assert_eq!(Some(0xcc), find_local("z").live_range.high);

    for parameter in &database.parameter_variables {
        assert!(matches!(
            parameter.storage,
            mipsym::ParameterStorage::Stack(_)
        ));
    }
}

// An N_RBRAC with no open block is a structural error.
#[test]
fn unmatched_block_end() {
    let mut database = SymbolDatabase::new();
    let source = database
        .symbol_sources
        .create_symbol("test", None, None)
        .unwrap()
        .handle();
    let context = AnalysisContext {
        globals: None,
        source,
        flags: ImporterFlags::STRICT_PARSING | ImporterFlags::DONT_DEDUPLICATE_SYMBOLS,
        demangler: None,
        interrupt: None,
    };
    let file = File::with_symbols(vec![
        Record::stabs(
            StabsCode::Fun,
            SymbolType::Label,
            SymbolClass::Text,
            0,
            "f:F1=1",
        ),
        rbrac(0x10),
    ]);
    assert!(matches!(
        import_file(&mut database, &file, &context),
        Err(Error::UnmatchedBlockEnd)
    ));
}

// A symbol table that ends while still inside a function is rejected.
#[test]
fn symbol_table_ending_mid_function() {
    let mut database = SymbolDatabase::new();
    let source = database
        .symbol_sources
        .create_symbol("test", None, None)
        .unwrap()
        .handle();
    let context = AnalysisContext {
        globals: None,
        source,
        flags: ImporterFlags::STRICT_PARSING | ImporterFlags::DONT_DEDUPLICATE_SYMBOLS,
        demangler: None,
        interrupt: None,
    };
    let file = File::with_symbols(vec![Record::stabs(
        StabsCode::Fun,
        SymbolType::Label,
        SymbolClass::Text,
        0,
        "f:F1=1",
    )]);
    assert!(matches!(
        import_file(&mut database, &file, &context),
        Err(Error::UnexpectedEndOfSymbolTable(_))
    ));
}

// Synthetic example. Two translation units define WobblyStruct, one with a
// field referencing a typedef and one with the raw built-in; the typedef
// variant wins.
#[test]
fn wobbly_typedef_deduplication() {
    let mut database = SymbolDatabase::new();
    let source = database
        .symbol_sources
        .create_symbol("test", None, None)
        .unwrap()
        .handle();
    let context = AnalysisContext {
        globals: None,
        source,
        flags: ImporterFlags::STRICT_PARSING | ImporterFlags::DONT_DEDUPLICATE_SYMBOLS,
        demangler: None,
        interrupt: None,
    };

    let raw_file = File::with_symbols(vec![lsym(
        "WobblyStruct:T(1,1)=s4value:(1,2)=r(1,2);-2147483648;2147483647;,0,32;;",
    )]);
    import_file(&mut database, &raw_file, &context).unwrap();

    let typedef_file = File::with_symbols(vec![
        lsym("MyInt:t(1,1)=r(1,1);-2147483648;2147483647;"),
        lsym("WobblyStruct:T(1,2)=s4value:(1,1),0,32;;"),
    ]);
    import_file(&mut database, &typedef_file, &context).unwrap();
    finish_import(&mut database, &context).unwrap();

    let handles = database.data_types.handles_from_name("WobblyStruct");
    assert_eq!(1, handles.len());
    let data_type = database.data_types.symbol_from_handle(handles[0]).unwrap();
    assert_eq!(2, data_type.files.len());

    let node = data_type.ty().unwrap();
    let NodeKind::StructOrUnion(struct_or_union) = &node.kind else {
        panic!("expected a struct");
    };
    let NodeKind::TypeName(type_name) = &struct_or_union.fields[0].kind else {
        panic!("the typedef side should have won");
    };
    let my_int = data_type_by_name(&database, "MyInt");
    assert_eq!(Some(my_int.handle()), type_name.data_type);
}

// Deduplication replacement invalidates node handles into the old tree.
#[test]
fn deduplication_invalidates_node_handles() {
    let mut database = SymbolDatabase::new();
    let source = database
        .symbol_sources
        .create_symbol("test", None, None)
        .unwrap()
        .handle();
    let context = AnalysisContext {
        globals: None,
        source,
        flags: ImporterFlags::STRICT_PARSING | ImporterFlags::DONT_DEDUPLICATE_SYMBOLS,
        demangler: None,
        interrupt: None,
    };

    let raw_file = File::with_symbols(vec![lsym(
        "WobblyStruct:T(1,1)=s4value:(1,2)=r(1,2);-2147483648;2147483647;,0,32;;",
    )]);
    import_file(&mut database, &raw_file, &context).unwrap();

    let data_type = data_type_by_name(&database, "WobblyStruct");
    let node_handle = NodeHandle::root(data_type);
    assert!(database.node_from_handle(&node_handle).is_some());

    let typedef_file = File::with_symbols(vec![
        lsym("MyInt:t(1,1)=r(1,1);-2147483648;2147483647;"),
        lsym("WobblyStruct:T(1,2)=s4value:(1,1),0,32;;"),
    ]);
    import_file(&mut database, &typedef_file, &context).unwrap();

    assert!(database.node_from_handle(&node_handle).is_none());
}

// A struct that is forward declared but never defined gets a synthesized
// forward-declared data type.
#[test]
fn forward_declarations_are_synthesized() {
    let database = run_importer(vec![Record::stabs(
        StabsCode::Gsym,
        SymbolType::Nil,
        SymbolClass::Nil,
        0,
        "gPtr:G(1,1)=*(1,2)=xsUndefinedStruct:",
    )]);

    let data_type = data_type_by_name(&database, "UndefinedStruct");
    assert!(data_type.not_defined_in_any_translation_unit);
    assert!(matches!(
        data_type.ty().unwrap().kind,
        NodeKind::ForwardDeclared {
            kind: mipsym::ForwardDeclaredKind::Struct
        }
    ));

    let global_handle = database
        .global_variables
        .first_handle_from_name("gPtr")
        .unwrap();
    let global = database
        .global_variables
        .symbol_from_handle(global_handle)
        .unwrap();
    let NodeKind::PointerOrReference { value_type, .. } = &global.ty().unwrap().kind else {
        panic!("expected a pointer");
    };
    let NodeKind::TypeName(type_name) = &value_type.kind else {
        panic!("expected a type name");
    };
    assert!(type_name.is_forward_declared);
    assert_eq!(Some(data_type.handle()), type_name.data_type);
    assert!(type_name.unresolved_stabs.is_none());
}

// Sizes are computed post-order and propagated onto variable symbols.
#[test]
fn sizes_are_computed_and_propagated() {
    let database = run_importer(vec![
        lsym("int:t(0,1)=r(0,1);-2147483648;2147483647;"),
        lsym("Pair:T(1,1)=s8x:(0,1),0,32;y:(0,1),32,32;;"),
        Record::stabs(
            StabsCode::Gsym,
            SymbolType::Nil,
            SymbolClass::Nil,
            0,
            "gPair:G(1,2)=(1,1)",
        ),
    ]);

    let pair = data_type_by_name(&database, "Pair");
    assert_eq!(8, pair.ty().unwrap().computed_size_bytes);

    let global_handle = database
        .global_variables
        .first_handle_from_name("gPair")
        .unwrap();
    let global = database
        .global_variables
        .symbol_from_handle(global_handle)
        .unwrap();
    assert_eq!(8, global.size());
}

// Member function declarations are linked to their definitions through the
// demangled function names.
#[test]
fn member_functions_are_linked_to_definitions() {
    let demangler = |name: &str, _: ImporterFlags| -> Option<String> {
        (name == "_ZN5Thing6updateEv").then(|| "Thing::update".to_string())
    };
    let mut database = run_importer_with_options(
        vec![
            lsym("int:t(1,2)=r(1,2);-2147483648;2147483647;"),
            lsym("Thing:Tt(1,1)=s4x:(1,2),0,32;update::(1,3)=#(1,1),(1,2),(1,4)=*(1,1);:_ZN5Thing6updateEv;2A.;;"),
            Record::stabs(
                StabsCode::Fun,
                SymbolType::Label,
                SymbolClass::Text,
                0,
                "_ZN5Thing6updateEv:F(1,2)",
            ),
            Record::non_stabs(SymbolType::Proc, SymbolClass::Text, 1, 0x00, "_ZN5Thing6updateEv"),
            Record::non_stabs(SymbolType::End, SymbolClass::Text, 3, 0x10, "_ZN5Thing6updateEv"),
        ],
        ImporterFlags::STRICT_PARSING,
        Some(&demangler),
    );
    link_member_functions(&mut database);

    let function_handle = database
        .functions
        .first_handle_from_name("Thing::update")
        .unwrap();
    let function = database
        .functions
        .symbol_from_handle(function_handle)
        .unwrap();
    assert!(function.is_member_function_ish);
    assert_eq!("_ZN5Thing6updateEv", function.mangled_name());

    let thing = data_type_by_name(&database, "Thing");
    let NodeKind::StructOrUnion(struct_or_union) = &thing.ty().unwrap().kind else {
        panic!("expected a struct");
    };
    let update = struct_or_union
        .member_functions
        .iter()
        .find(|member| member.name == "update")
        .unwrap();
    let NodeKind::Function(function_type) = &update.kind else {
        panic!("expected a function");
    };
    assert_eq!(Some(function_handle), function_type.definition_handle);
}

// Static locals get global storage and keep their live ranges.
#[test]
fn static_local_variables() {
    let mut symbols = vec![
        lsym("int:t(0,1)=r(0,1);-2147483648;2147483647;"),
        Record::stabs(
            StabsCode::Fun,
            SymbolType::Label,
            SymbolClass::Text,
            0,
            "f:F(0,1)",
        ),
        Record::non_stabs(SymbolType::Proc, SymbolClass::Text, 1, 0x00, "f"),
        Record::non_stabs(SymbolType::End, SymbolClass::Text, 3, 0x10, "f"),
    ];
    symbols.push(Record::stabs(
        StabsCode::Stsym,
        SymbolType::Nil,
        SymbolClass::Data,
        0x1000,
        "counter:V(0,1)",
    ));
    let database = run_importer(symbols);

    assert_eq!(1, database.local_variables.len());
    let local = database.local_variables.iter().next().unwrap();
    assert_eq!("counter", local.name());
    let VariableStorage::Global(storage) = &local.storage else {
        panic!("expected global storage");
    };
    assert_eq!(Some(0x1000), storage.address);
    assert_eq!(
        StorageClass::Static,
        local.ty().unwrap().storage_class
    );
    assert_eq!(4, local.size());
}

// Destroying the import's symbol source rolls the whole thing back.
#[test]
fn destroying_the_source_rolls_back_the_import() {
    let mut database = SymbolDatabase::new();
    let source = database
        .symbol_sources
        .create_symbol("test", None, None)
        .unwrap()
        .handle();
    let context = AnalysisContext {
        globals: None,
        source,
        flags: ImporterFlags::STRICT_PARSING | ImporterFlags::DONT_DEDUPLICATE_SYMBOLS,
        demangler: None,
        interrupt: None,
    };
    let file = File::with_symbols(complicated_function_symbols());
    import_file(&mut database, &file, &context).unwrap();
    finish_import(&mut database, &context).unwrap();
    assert!(!database.functions.is_empty());

    database.destroy_symbols_from_source(source);
    assert!(database.functions.is_empty());
    assert!(database.local_variables.is_empty());
    assert!(database.parameter_variables.is_empty());
    assert!(database.data_types.is_empty());
    assert!(database.source_files.is_empty());
}

// Build the smallest structurally valid .mdebug section: one file
// descriptor with no symbols. The internal offsets are relative to the
// start of the file, so the caller has to say where the section will land.
fn empty_mdebug_section(base: i32) -> Vec<u8> {
    let mut section = vec![0_u8; 0x60];
    section[0..2].copy_from_slice(&MDEBUG_MAGIC.to_le_bytes());

    let strings_offset = base + section.len() as i32;
    section.extend_from_slice(b"empty.c\0");

    let descriptors_offset = base + section.len() as i32;
    section.extend_from_slice(&[0_u8; 0x48]);

    section[0x3c..0x40].copy_from_slice(&strings_offset.to_le_bytes());
    section[0x48..0x4c].copy_from_slice(&1_i32.to_le_bytes());
    section[0x4c..0x50].copy_from_slice(&descriptors_offset.to_le_bytes());
    section
}

#[test]
fn interrupting_an_import_stops_it() {
    let image = empty_mdebug_section(0);
    let reader = SymbolTableReader::new(&image, 0).unwrap();

    let mut database = SymbolDatabase::new();
    let source = database
        .symbol_sources
        .create_symbol("test", None, None)
        .unwrap()
        .handle();

    let interrupt = AtomicBool::new(true);
    let options = ImportOptions {
        flags: ImporterFlags::STRICT_PARSING,
        demangler: None,
        interrupt: Some(&interrupt),
    };
    assert!(matches!(
        import_symbol_table(&mut database, &reader, source, &options),
        Err(Error::Interrupted)
    ));

    interrupt.store(false, Ordering::Relaxed);
    import_symbol_table(&mut database, &reader, source, &options).unwrap();
    assert_eq!(1, database.source_files.len());
}

// End to end: locate the .mdebug section in an ELF image, create section
// symbols, and import the symbol table.
#[test]
fn importing_an_elf_image() {
    let mut image = vec![0_u8; 0x34];
    image[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    image[4] = 1; // 32-bit
    image[5] = 1; // little endian
    let section_header_offset = 0x100_u32;
    image[0x20..0x24].copy_from_slice(&section_header_offset.to_le_bytes());
    image[0x30..0x32].copy_from_slice(&3_u16.to_le_bytes());
    image[0x32..0x34].copy_from_slice(&2_u16.to_le_bytes());
    image.resize(0x100 + 3 * 0x28, 0);

    let mdebug_offset = image.len() as u32;
    let section = empty_mdebug_section(mdebug_offset as i32);
    let mdebug_size = section.len() as u32;
    image.extend_from_slice(&section);

    let strings_offset = image.len() as u32;
    image.extend_from_slice(b"\0.mdebug\0.shstrtab\0");

    let s1 = 0x100 + 0x28;
    image[s1..s1 + 4].copy_from_slice(&1_u32.to_le_bytes());
    image[s1 + 4..s1 + 8].copy_from_slice(&0x70000005_u32.to_le_bytes());
    image[s1 + 0x10..s1 + 0x14].copy_from_slice(&mdebug_offset.to_le_bytes());
    image[s1 + 0x14..s1 + 0x18].copy_from_slice(&mdebug_size.to_le_bytes());

    let s2 = 0x100 + 2 * 0x28;
    image[s2..s2 + 4].copy_from_slice(&9_u32.to_le_bytes());
    image[s2 + 4..s2 + 8].copy_from_slice(&3_u32.to_le_bytes());
    image[s2 + 0x10..s2 + 0x14].copy_from_slice(&strings_offset.to_le_bytes());

    let elf = mipsym::ElfFile::parse(image).unwrap();
    assert_eq!(
        mipsym::SymbolTableFormats::MDEBUG,
        mipsym::identify_symbol_tables(&elf)
    );

    let mut database = SymbolDatabase::new();
    let options = ImportOptions {
        flags: ImporterFlags::STRICT_PARSING,
        demangler: None,
        interrupt: None,
    };
    mipsym::import_elf(&mut database, &elf, &options).unwrap();

    assert_eq!(3, database.sections.len());
    assert!(database.sections.first_handle_from_name(".mdebug").is_some());
    assert_eq!(1, database.source_files.len());
    let source_file = database.source_files.iter().next().unwrap();
    assert_eq!("empty.c", source_file.full_path());
}
