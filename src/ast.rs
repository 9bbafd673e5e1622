use crate::database::DataTypeHandle;
use crate::database::FunctionHandle;
use crate::database::SourceFileHandle;
use crate::database::Symbol;
use crate::database::SymbolDatabase;
use crate::flags::ImporterFlags;
use crate::stabs::ForwardDeclaredKind;
use crate::stabs::MemberFunctionModifier;
use crate::stabs::TypeNum;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum StorageClass {
    #[default]
    None,
    Typedef,
    Extern,
    Static,
    Auto,
    Register,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum AccessSpecifier {
    #[default]
    Public,
    Protected,
    Private,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BuiltInClass {
    Void,
    UnsignedInt8,
    SignedInt8,
    UnqualifiedInt8,
    Bool8,
    UnsignedInt16,
    SignedInt16,
    UnsignedInt32,
    SignedInt32,
    Float32,
    UnsignedInt64,
    SignedInt64,
    Float64,
    UnsignedInt128,
    SignedInt128,
    UnqualifiedInt128,
    Float128,
    UnknownProbablyArray,
}

pub fn builtin_class_size(class: BuiltInClass) -> i32 {
    match class {
        BuiltInClass::Void => 0,
        BuiltInClass::UnsignedInt8 => 1,
        BuiltInClass::SignedInt8 => 1,
        BuiltInClass::UnqualifiedInt8 => 1,
        BuiltInClass::Bool8 => 1,
        BuiltInClass::UnsignedInt16 => 2,
        BuiltInClass::SignedInt16 => 2,
        BuiltInClass::UnsignedInt32 => 4,
        BuiltInClass::SignedInt32 => 4,
        BuiltInClass::Float32 => 4,
        BuiltInClass::UnsignedInt64 => 8,
        BuiltInClass::SignedInt64 => 8,
        BuiltInClass::Float64 => 8,
        BuiltInClass::UnsignedInt128 => 16,
        BuiltInClass::SignedInt128 => 16,
        BuiltInClass::UnqualifiedInt128 => 16,
        BuiltInClass::Float128 => 16,
        BuiltInClass::UnknownProbablyArray => 0,
    }
}

pub fn builtin_class_to_string(class: BuiltInClass) -> &'static str {
    match class {
        BuiltInClass::Void => "void",
        BuiltInClass::UnsignedInt8 => "8-bit unsigned integer",
        BuiltInClass::SignedInt8 => "8-bit signed integer",
        BuiltInClass::UnqualifiedInt8 => "8-bit integer",
        BuiltInClass::Bool8 => "8-bit boolean",
        BuiltInClass::UnsignedInt16 => "16-bit unsigned integer",
        BuiltInClass::SignedInt16 => "16-bit signed integer",
        BuiltInClass::UnsignedInt32 => "32-bit unsigned integer",
        BuiltInClass::SignedInt32 => "32-bit signed integer",
        BuiltInClass::Float32 => "32-bit floating point",
        BuiltInClass::UnsignedInt64 => "64-bit unsigned integer",
        BuiltInClass::SignedInt64 => "64-bit signed integer",
        BuiltInClass::Float64 => "64-bit floating point",
        BuiltInClass::UnsignedInt128 => "128-bit unsigned integer",
        BuiltInClass::SignedInt128 => "128-bit signed integer",
        BuiltInClass::UnqualifiedInt128 => "128-bit integer",
        BuiltInClass::Float128 => "128-bit floating point",
        BuiltInClass::UnknownProbablyArray => "unknown (probably an array)",
    }
}

/// Where a type name came from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypeNameSource {
    /// A reference to a named type by its type number.
    Reference,
    /// A forward declaration.
    CrossReference,
    /// A reference to an unnamed type from a generated member function,
    /// usually the this parameter.
    UnnamedThis,
    /// A lookup failure tolerated in non-strict mode.
    Error,
}

/// The information needed to resolve a type name to a data type handle after
/// all the translation units have been imported.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct UnresolvedStabs {
    pub type_name: String,
    pub referenced_file: Option<SourceFileHandle>,
    pub stabs_type_number: Option<TypeNum>,
    pub forward_declared_kind: Option<ForwardDeclaredKind>,
}

#[derive(Debug)]
pub struct TypeName {
    pub source: TypeNameSource,
    pub data_type: Option<DataTypeHandle>,
    pub is_forward_declared: bool,
    pub unresolved_stabs: Option<Box<UnresolvedStabs>>,
}

#[derive(Debug)]
pub struct FunctionType {
    pub return_type: Option<Box<Node>>,
    pub parameters: Option<Vec<Node>>,
    pub modifier: MemberFunctionModifier,
    pub vtable_index: Option<i32>,
    pub is_constructor: bool,
    /// Filled in by [`crate::link_member_functions`].
    pub definition_handle: Option<FunctionHandle>,
}

#[derive(Debug)]
pub struct StructOrUnion {
    pub is_struct: bool,
    pub base_classes: Vec<Node>,
    pub fields: Vec<Node>,
    pub member_functions: Vec<Node>,
}

#[derive(Debug)]
pub enum NodeKind {
    Array {
        element_type: Box<Node>,
        element_count: i32,
    },
    BitField {
        underlying_type: Box<Node>,
        /// Offset relative to the last byte, not the position of the
        /// underlying type.
        bitfield_offset_bits: i32,
    },
    BuiltIn {
        class: BuiltInClass,
    },
    /// The refined value of a variable, for printing.
    Data {
        value: String,
    },
    Enum {
        constants: Vec<(i32, String)>,
    },
    ForwardDeclared {
        kind: ForwardDeclaredKind,
    },
    Function(FunctionType),
    /// The refined value of an aggregate variable, for printing.
    InitializerList {
        children: Vec<Node>,
    },
    PointerOrReference {
        is_pointer: bool,
        value_type: Box<Node>,
    },
    PointerToDataMember {
        class_type: Box<Node>,
        member_type: Box<Node>,
    },
    StructOrUnion(StructOrUnion),
    TypeName(TypeName),
}

/// A node in the type AST attached to a symbol.
///
/// If the name isn't populated for a given node, the name of the last
/// ancestor to have one applies.
#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub name: String,
    pub storage_class: StorageClass,
    pub access_specifier: AccessSpecifier,
    pub is_const: bool,
    pub is_volatile: bool,
    pub is_base_class: bool,
    pub is_vtable_pointer: bool,
    /// Offset relative to the start of the last inline struct or union.
    pub relative_offset_bytes: i32,
    /// Offset relative to the outermost struct or union.
    pub absolute_offset_bytes: i32,
    /// Size stored in the symbol table.
    pub size_bits: i32,
    /// Calculated by the size computation pass, -1 if unknown.
    pub computed_size_bytes: i32,
    pub cannot_compute_size: bool,
    pub stabs_type_number: Option<TypeNum>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            name: String::new(),
            storage_class: StorageClass::None,
            access_specifier: AccessSpecifier::Public,
            is_const: false,
            is_volatile: false,
            is_base_class: false,
            is_vtable_pointer: false,
            relative_offset_bytes: -1,
            absolute_offset_bytes: -1,
            size_bits: -1,
            computed_size_bytes: -1,
            cannot_compute_size: false,
            stabs_type_number: None,
        }
    }

    pub fn set_access_specifier(&mut self, specifier: AccessSpecifier, flags: ImporterFlags) {
        if !flags.contains(ImporterFlags::NO_ACCESS_SPECIFIERS) {
            self.access_specifier = specifier;
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Array { .. } => "array",
            NodeKind::BitField { .. } => "bitfield",
            NodeKind::BuiltIn { .. } => "builtin",
            NodeKind::Data { .. } => "data",
            NodeKind::Enum { .. } => "enum",
            NodeKind::ForwardDeclared { .. } => "forward_declared",
            NodeKind::Function(_) => "function",
            NodeKind::InitializerList { .. } => "initializer_list",
            NodeKind::PointerOrReference { is_pointer: true, .. } => "pointer",
            NodeKind::PointerOrReference { is_pointer: false, .. } => "reference",
            NodeKind::PointerToDataMember { .. } => "pointer_to_data_member",
            NodeKind::StructOrUnion(struct_or_union) => {
                if struct_or_union.is_struct {
                    "struct"
                } else {
                    "union"
                }
            }
            NodeKind::TypeName(_) => "type_name",
        }
    }

    /// All the direct children of this node, in a canonical order. Node
    /// handle paths index into this list.
    pub fn children(&self) -> Vec<&Node> {
        match &self.kind {
            NodeKind::Array { element_type, .. } => vec![element_type],
            NodeKind::BitField {
                underlying_type, ..
            } => vec![underlying_type],
            NodeKind::Function(function) => {
                let mut children = Vec::new();
                if let Some(return_type) = &function.return_type {
                    children.push(&**return_type);
                }
                if let Some(parameters) = &function.parameters {
                    children.extend(parameters.iter());
                }
                children
            }
            NodeKind::InitializerList { children } => children.iter().collect(),
            NodeKind::PointerOrReference { value_type, .. } => vec![value_type],
            NodeKind::PointerToDataMember {
                class_type,
                member_type,
            } => vec![class_type, member_type],
            NodeKind::StructOrUnion(struct_or_union) => struct_or_union
                .base_classes
                .iter()
                .chain(struct_or_union.fields.iter())
                .chain(struct_or_union.member_functions.iter())
                .collect(),
            NodeKind::BuiltIn { .. }
            | NodeKind::Data { .. }
            | NodeKind::Enum { .. }
            | NodeKind::ForwardDeclared { .. }
            | NodeKind::TypeName(_) => Vec::new(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Node> {
        match &mut self.kind {
            NodeKind::Array { element_type, .. } => vec![element_type],
            NodeKind::BitField {
                underlying_type, ..
            } => vec![underlying_type],
            NodeKind::Function(function) => {
                let mut children = Vec::new();
                if let Some(return_type) = &mut function.return_type {
                    children.push(&mut **return_type);
                }
                if let Some(parameters) = &mut function.parameters {
                    children.extend(parameters.iter_mut());
                }
                children
            }
            NodeKind::InitializerList { children } => children.iter_mut().collect(),
            NodeKind::PointerOrReference { value_type, .. } => vec![value_type],
            NodeKind::PointerToDataMember {
                class_type,
                member_type,
            } => vec![class_type, member_type],
            NodeKind::StructOrUnion(struct_or_union) => struct_or_union
                .base_classes
                .iter_mut()
                .chain(struct_or_union.fields.iter_mut())
                .chain(struct_or_union.member_functions.iter_mut())
                .collect(),
            NodeKind::BuiltIn { .. }
            | NodeKind::Data { .. }
            | NodeKind::Enum { .. }
            | NodeKind::ForwardDeclared { .. }
            | NodeKind::TypeName(_) => Vec::new(),
        }
    }

    pub fn child(&self, index: usize) -> Option<&Node> {
        self.children().into_iter().nth(index)
    }

    /// Pre-order traversal over the whole tree.
    pub fn visit(&self, callback: &mut dyn FnMut(&Node)) {
        callback(self);
        for child in self.children() {
            child.visit(callback);
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CompareResultKind {
    /// Both sides are identical.
    MatchesNoSwap,
    /// Both sides are almost identical, and we don't know which is better.
    MatchesConfused,
    /// Both sides are almost identical, but the left side is better.
    MatchesFavourLhs,
    /// Both sides are almost identical, but the right side is better.
    MatchesFavourRhs,
    /// The two nodes differ substantially.
    Differs,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CompareFailReason {
    Descriptor,
    StorageClass,
    Name,
    RelativeOffsetBytes,
    AbsoluteOffsetBytes,
    BitfieldOffsetBits,
    SizeBits,
    Constness,
    ArrayElementCount,
    BuiltInClass,
    DataValue,
    FunctionReturnTypeHasValue,
    FunctionParameterCount,
    FunctionParametersHasValue,
    FunctionModifier,
    FunctionIsConstructor,
    EnumConstants,
    BaseClassCount,
    FieldCount,
    InitializerListCount,
    MemberFunctionCount,
    TypeName,
}

pub fn compare_fail_reason_to_string(reason: CompareFailReason) -> &'static str {
    match reason {
        CompareFailReason::Descriptor => "descriptor",
        CompareFailReason::StorageClass => "storage class",
        CompareFailReason::Name => "name",
        CompareFailReason::RelativeOffsetBytes => "relative offset",
        CompareFailReason::AbsoluteOffsetBytes => "absolute offset",
        CompareFailReason::BitfieldOffsetBits => "bitfield offset",
        CompareFailReason::SizeBits => "size",
        CompareFailReason::Constness => "constness",
        CompareFailReason::ArrayElementCount => "array element count",
        CompareFailReason::BuiltInClass => "builtin class",
        CompareFailReason::DataValue => "data value",
        CompareFailReason::FunctionReturnTypeHasValue => "function return type has value",
        CompareFailReason::FunctionParameterCount => "function parameter count",
        CompareFailReason::FunctionParametersHasValue => "function parameters has value",
        CompareFailReason::FunctionModifier => "function modifier",
        CompareFailReason::FunctionIsConstructor => "function is constructor",
        CompareFailReason::EnumConstants => "enum constant",
        CompareFailReason::BaseClassCount => "base class count",
        CompareFailReason::FieldCount => "fields size",
        CompareFailReason::InitializerListCount => "initializer list size",
        CompareFailReason::MemberFunctionCount => "member function count",
        CompareFailReason::TypeName => "type name",
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CompareResult {
    pub kind: CompareResultKind,
    pub fail_reason: Option<CompareFailReason>,
}

impl CompareResult {
    fn matches() -> Self {
        Self {
            kind: CompareResultKind::MatchesNoSwap,
            fail_reason: None,
        }
    }

    fn differs(reason: CompareFailReason) -> Self {
        Self {
            kind: CompareResultKind::Differs,
            fail_reason: Some(reason),
        }
    }
}

/// Structurally compare two type trees.
///
/// Used to determine whether types from different translation units are the
/// same and can be merged into one canonical entry. If
/// `check_intrusive_fields` is false, fields that differ between declarations
/// and their uses (offsets, storage class, names) are not compared.
pub fn compare_nodes(
    node_lhs: &Node,
    node_rhs: &Node,
    database: &SymbolDatabase,
    check_intrusive_fields: bool,
) -> CompareResult {
    let mut result = CompareResult::matches();

    if check_intrusive_fields {
        if node_lhs.storage_class != node_rhs.storage_class {
            return CompareResult::differs(CompareFailReason::StorageClass);
        }
        if node_lhs.name != node_rhs.name
            && !(node_lhs.is_vtable_pointer && node_rhs.is_vtable_pointer)
        {
            return CompareResult::differs(CompareFailReason::Name);
        }
        if node_lhs.relative_offset_bytes != node_rhs.relative_offset_bytes {
            return CompareResult::differs(CompareFailReason::RelativeOffsetBytes);
        }
        if node_lhs.absolute_offset_bytes != node_rhs.absolute_offset_bytes {
            return CompareResult::differs(CompareFailReason::AbsoluteOffsetBytes);
        }
        if node_lhs.size_bits != node_rhs.size_bits {
            return CompareResult::differs(CompareFailReason::SizeBits);
        }
        if node_lhs.is_const != node_rhs.is_const {
            return CompareResult::differs(CompareFailReason::Constness);
        }
    }

    match (&node_lhs.kind, &node_rhs.kind) {
        (
            NodeKind::Array {
                element_type: lhs_element,
                element_count: lhs_count,
            },
            NodeKind::Array {
                element_type: rhs_element,
                element_count: rhs_count,
            },
        ) => {
            if compare_nodes_and_merge(&mut result, lhs_element, rhs_element, database) {
                return result;
            }
            if lhs_count != rhs_count {
                return CompareResult::differs(CompareFailReason::ArrayElementCount);
            }
        }
        (
            NodeKind::BitField {
                underlying_type: lhs_underlying,
                bitfield_offset_bits: lhs_offset,
            },
            NodeKind::BitField {
                underlying_type: rhs_underlying,
                bitfield_offset_bits: rhs_offset,
            },
        ) => {
            if lhs_offset != rhs_offset {
                return CompareResult::differs(CompareFailReason::BitfieldOffsetBits);
            }
            if compare_nodes_and_merge(&mut result, lhs_underlying, rhs_underlying, database) {
                return result;
            }
        }
        (NodeKind::BuiltIn { class: lhs_class }, NodeKind::BuiltIn { class: rhs_class }) => {
            if lhs_class != rhs_class {
                return CompareResult::differs(CompareFailReason::BuiltInClass);
            }
        }
        (NodeKind::Data { value: lhs_value }, NodeKind::Data { value: rhs_value }) => {
            if lhs_value != rhs_value {
                return CompareResult::differs(CompareFailReason::DataValue);
            }
        }
        (
            NodeKind::Enum {
                constants: lhs_constants,
            },
            NodeKind::Enum {
                constants: rhs_constants,
            },
        ) => {
            if lhs_constants != rhs_constants {
                return CompareResult::differs(CompareFailReason::EnumConstants);
            }
        }
        (
            NodeKind::ForwardDeclared { kind: lhs_kind },
            NodeKind::ForwardDeclared { kind: rhs_kind },
        ) => {
            if lhs_kind != rhs_kind {
                return CompareResult::differs(CompareFailReason::Descriptor);
            }
        }
        (NodeKind::Function(lhs), NodeKind::Function(rhs)) => {
            match (&lhs.return_type, &rhs.return_type) {
                (Some(lhs_return), Some(rhs_return)) => {
                    if compare_nodes_and_merge(&mut result, lhs_return, rhs_return, database) {
                        return result;
                    }
                }
                (None, None) => {}
                _ => return CompareResult::differs(CompareFailReason::FunctionReturnTypeHasValue),
            }
            match (&lhs.parameters, &rhs.parameters) {
                (Some(lhs_parameters), Some(rhs_parameters)) => {
                    if lhs_parameters.len() != rhs_parameters.len() {
                        return CompareResult::differs(CompareFailReason::FunctionParameterCount);
                    }
                    for (lhs_parameter, rhs_parameter) in
                        lhs_parameters.iter().zip(rhs_parameters.iter())
                    {
                        if compare_nodes_and_merge(&mut result, lhs_parameter, rhs_parameter, database)
                        {
                            return result;
                        }
                    }
                }
                (None, None) => {}
                _ => return CompareResult::differs(CompareFailReason::FunctionParametersHasValue),
            }
            if lhs.modifier != rhs.modifier {
                return CompareResult::differs(CompareFailReason::FunctionModifier);
            }
            if lhs.is_constructor != rhs.is_constructor {
                return CompareResult::differs(CompareFailReason::FunctionIsConstructor);
            }
        }
        (
            NodeKind::InitializerList {
                children: lhs_children,
            },
            NodeKind::InitializerList {
                children: rhs_children,
            },
        ) => {
            if lhs_children.len() != rhs_children.len() {
                return CompareResult::differs(CompareFailReason::InitializerListCount);
            }
            for (lhs_child, rhs_child) in lhs_children.iter().zip(rhs_children.iter()) {
                if compare_nodes_and_merge(&mut result, lhs_child, rhs_child, database) {
                    return result;
                }
            }
        }
        (
            NodeKind::PointerOrReference {
                is_pointer: lhs_is_pointer,
                value_type: lhs_value,
            },
            NodeKind::PointerOrReference {
                is_pointer: rhs_is_pointer,
                value_type: rhs_value,
            },
        ) => {
            if lhs_is_pointer != rhs_is_pointer {
                return CompareResult::differs(CompareFailReason::Descriptor);
            }
            if compare_nodes_and_merge(&mut result, lhs_value, rhs_value, database) {
                return result;
            }
        }
        (
            NodeKind::PointerToDataMember {
                class_type: lhs_class,
                member_type: lhs_member,
            },
            NodeKind::PointerToDataMember {
                class_type: rhs_class,
                member_type: rhs_member,
            },
        ) => {
            if compare_nodes_and_merge(&mut result, lhs_class, rhs_class, database) {
                return result;
            }
            if compare_nodes_and_merge(&mut result, lhs_member, rhs_member, database) {
                return result;
            }
        }
        (NodeKind::StructOrUnion(lhs), NodeKind::StructOrUnion(rhs)) => {
            if lhs.is_struct != rhs.is_struct {
                return CompareResult::differs(CompareFailReason::Descriptor);
            }
            if lhs.base_classes.len() != rhs.base_classes.len() {
                return CompareResult::differs(CompareFailReason::BaseClassCount);
            }
            for (lhs_base, rhs_base) in lhs.base_classes.iter().zip(rhs.base_classes.iter()) {
                if compare_nodes_and_merge(&mut result, lhs_base, rhs_base, database) {
                    return result;
                }
            }
            if lhs.fields.len() != rhs.fields.len() {
                return CompareResult::differs(CompareFailReason::FieldCount);
            }
            for (lhs_field, rhs_field) in lhs.fields.iter().zip(rhs.fields.iter()) {
                if compare_nodes_and_merge(&mut result, lhs_field, rhs_field, database) {
                    return result;
                }
            }
            if lhs.member_functions.len() != rhs.member_functions.len() {
                return CompareResult::differs(CompareFailReason::MemberFunctionCount);
            }
            for (lhs_function, rhs_function) in
                lhs.member_functions.iter().zip(rhs.member_functions.iter())
            {
                if compare_nodes_and_merge(&mut result, lhs_function, rhs_function, database) {
                    return result;
                }
            }
        }
        (NodeKind::TypeName(lhs), NodeKind::TypeName(rhs)) => {
            // The source is intentionally not compared so that references and
            // cross references are treated as the same.
            if lhs.data_type.is_some() {
                if lhs.data_type != rhs.data_type {
                    return CompareResult::differs(CompareFailReason::TypeName);
                }
            } else {
                let lhs_name = lhs.unresolved_stabs.as_ref().map(|u| &u.type_name);
                let rhs_name = rhs.unresolved_stabs.as_ref().map(|u| &u.type_name);
                if lhs_name != rhs_name {
                    return CompareResult::differs(CompareFailReason::TypeName);
                }
            }
        }
        _ => return CompareResult::differs(CompareFailReason::Descriptor),
    }

    result
}

/// Compare two child nodes and merge the result into `dest`. Returns true if
/// the whole comparison already differs and can be cut short.
fn compare_nodes_and_merge(
    dest: &mut CompareResult,
    node_lhs: &Node,
    node_rhs: &Node,
    database: &SymbolDatabase,
) -> bool {
    use CompareResultKind::*;

    let mut result = compare_nodes(node_lhs, node_rhs, database, true);
    try_to_match_wobbly_typedefs(&mut result, node_lhs, node_rhs, database);

    if dest.kind != result.kind {
        dest.kind = match (dest.kind, result.kind) {
            // If any of the inner types differ, the outer type does too.
            (Differs, _) | (_, Differs) => Differs,
            // Propagate confusion.
            (MatchesConfused, _) | (_, MatchesConfused) => MatchesConfused,
            // One of the results favours the left node and the other favours
            // the right node, so we are confused.
            (MatchesFavourLhs, MatchesFavourRhs) | (MatchesFavourRhs, MatchesFavourLhs) => {
                MatchesConfused
            }
            (MatchesFavourLhs, _) | (_, MatchesFavourLhs) => MatchesFavourLhs,
            (MatchesFavourRhs, _) | (_, MatchesFavourRhs) => MatchesFavourRhs,
            (MatchesNoSwap, MatchesNoSwap) => MatchesNoSwap,
        };
    }
    if dest.fail_reason.is_none() {
        dest.fail_reason = result.fail_reason;
    }

    dest.kind == Differs
}

/// Detect if one side has a typedef where the other has the plain type. This
/// was previously a common reason why type deduplication would fail.
fn try_to_match_wobbly_typedefs(
    result: &mut CompareResult,
    node_lhs: &Node,
    node_rhs: &Node,
    database: &SymbolDatabase,
) {
    let mut type_name_node = node_lhs;
    let mut raw_node = node_rhs;
    for i in 0..2 {
        if result.kind != CompareResultKind::Differs {
            break;
        }
        if let NodeKind::TypeName(type_name) = &type_name_node.kind {
            if let Some(referenced_type) = lookup_referenced_type(type_name, database) {
                if let Some(referenced_node) = referenced_type.ty() {
                    // Don't compare 'intrusive' fields e.g. the offset.
                    let new_result = compare_nodes(referenced_node, raw_node, database, false);
                    if new_result.kind != CompareResultKind::Differs {
                        result.kind = if i == 0 {
                            CompareResultKind::MatchesFavourLhs
                        } else {
                            CompareResultKind::MatchesFavourRhs
                        };
                    }
                }
            }
        }
        core::mem::swap(&mut type_name_node, &mut raw_node);
    }
}

fn lookup_referenced_type<'a>(
    type_name: &TypeName,
    database: &'a SymbolDatabase,
) -> Option<&'a crate::database::DataType> {
    let unresolved = type_name.unresolved_stabs.as_ref()?;
    let file_handle = unresolved.referenced_file?;
    let number = unresolved.stabs_type_number?;
    let source_file = database.source_files.symbol_from_handle(file_handle)?;
    let handle = *source_file.stabs_type_number_to_handle.get(&number)?;
    database.data_types.symbol_from_handle(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Symbol;

    fn named(name: &str, kind: NodeKind) -> Node {
        let mut node = Node::new(kind);
        node.name = name.to_string();
        node
    }

    #[test]
    fn compare_built_ins() {
        let database = SymbolDatabase::new();
        let lhs = named(
            "x",
            NodeKind::BuiltIn {
                class: BuiltInClass::SignedInt32,
            },
        );
        let rhs = named(
            "x",
            NodeKind::BuiltIn {
                class: BuiltInClass::SignedInt32,
            },
        );
        let result = compare_nodes(&lhs, &rhs, &database, true);
        assert_eq!(CompareResultKind::MatchesNoSwap, result.kind);

        let other = named(
            "x",
            NodeKind::BuiltIn {
                class: BuiltInClass::UnsignedInt32,
            },
        );
        let result = compare_nodes(&lhs, &other, &database, true);
        assert_eq!(CompareResultKind::Differs, result.kind);
        assert_eq!(Some(CompareFailReason::BuiltInClass), result.fail_reason);
    }

    #[test]
    fn differing_child_propagates() {
        let database = SymbolDatabase::new();
        let mut lhs_field = named(
            "a",
            NodeKind::BuiltIn {
                class: BuiltInClass::SignedInt32,
            },
        );
        lhs_field.relative_offset_bytes = 0;
        let mut rhs_field = named(
            "a",
            NodeKind::BuiltIn {
                class: BuiltInClass::SignedInt32,
            },
        );
        rhs_field.relative_offset_bytes = 4;

        let lhs = named(
            "S",
            NodeKind::StructOrUnion(StructOrUnion {
                is_struct: true,
                base_classes: Vec::new(),
                fields: vec![lhs_field],
                member_functions: Vec::new(),
            }),
        );
        let rhs = named(
            "S",
            NodeKind::StructOrUnion(StructOrUnion {
                is_struct: true,
                base_classes: Vec::new(),
                fields: vec![rhs_field],
                member_functions: Vec::new(),
            }),
        );
        let result = compare_nodes(&lhs, &rhs, &database, true);
        assert_eq!(CompareResultKind::Differs, result.kind);
        assert_eq!(
            Some(CompareFailReason::RelativeOffsetBytes),
            result.fail_reason
        );
    }

    #[test]
    fn wobbly_typedef_favours_the_typedef_side() {
        let mut database = SymbolDatabase::new();
        let source = database
            .symbol_sources
            .create_symbol("test", None, None)
            .expect("create source")
            .handle();
        let file_handle = database
            .source_files
            .create_symbol("test.cpp", Some(source), None)
            .expect("create file")
            .handle();

        // Register a typedef "MyInt" for a signed 32-bit integer as (1,1).
        let number = TypeNum { file: 1, index: 1 };
        let mut typedef_node = named(
            "MyInt",
            NodeKind::BuiltIn {
                class: BuiltInClass::SignedInt32,
            },
        );
        typedef_node.storage_class = StorageClass::Typedef;
        let data_type = database
            .data_types
            .create_symbol("MyInt", Some(source), None)
            .expect("create data type");
        data_type.set_type(Box::new(typedef_node));
        let handle = data_type.handle();
        let source_file = database
            .source_files
            .symbol_from_handle_mut(file_handle)
            .expect("source file");
        source_file
            .stabs_type_number_to_handle
            .insert(number, handle);

        // One struct field references the typedef, the other the plain type.
        let mut typedef_field = named(
            "x",
            NodeKind::TypeName(TypeName {
                source: TypeNameSource::Reference,
                data_type: None,
                is_forward_declared: false,
                unresolved_stabs: Some(Box::new(UnresolvedStabs {
                    type_name: "MyInt".to_string(),
                    referenced_file: Some(file_handle),
                    stabs_type_number: Some(number),
                    forward_declared_kind: None,
                })),
            }),
        );
        typedef_field.relative_offset_bytes = 0;
        let mut raw_field = named(
            "x",
            NodeKind::BuiltIn {
                class: BuiltInClass::SignedInt32,
            },
        );
        raw_field.relative_offset_bytes = 0;

        let wrap = |field: Node| {
            named(
                "WobblyStruct",
                NodeKind::StructOrUnion(StructOrUnion {
                    is_struct: true,
                    base_classes: Vec::new(),
                    fields: vec![field],
                    member_functions: Vec::new(),
                }),
            )
        };
        let lhs = wrap(raw_field);
        let rhs = wrap(typedef_field);
        let result = compare_nodes(&lhs, &rhs, &database, true);
        assert_eq!(CompareResultKind::MatchesFavourRhs, result.kind);
    }
}
