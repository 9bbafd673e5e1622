use std::collections::BTreeMap;

use crate::ast::builtin_class_size;
use crate::ast::AccessSpecifier;
use crate::ast::BuiltInClass;
use crate::ast::FunctionType;
use crate::ast::Node;
use crate::ast::NodeKind;
use crate::ast::StorageClass;
use crate::ast::StructOrUnion;
use crate::ast::TypeName;
use crate::ast::TypeNameSource;
use crate::ast::UnresolvedStabs;
use crate::database::SourceFileHandle;
use crate::flags::ImporterFlags;
use crate::stabs::ForwardDeclaredKind;
use crate::stabs::StabsField;
use crate::stabs::StabsFieldVisibility;
use crate::stabs::StabsMemberFunctionSet;
use crate::stabs::StabsType;
use crate::stabs::StabsTypeBody;
use crate::stabs::TypeNum;
use crate::Error;
use crate::Result;

/// Conversion stops at this depth to guarantee termination on malformed
/// cyclic input.
const MAX_DEPTH: u32 = 200;

/// The number of type aliases the bitfield detector will look through.
const MAX_BITFIELD_RESOLVE_STEPS: usize = 50;

/// The state needed to convert the STABS types from one translation unit.
pub struct StabsToAstState<'a> {
    pub file_handle: SourceFileHandle,
    pub stabs_types: &'a BTreeMap<TypeNum, &'a StabsType>,
    pub flags: ImporterFlags,
}

/// Convert a parsed STABS type into a language-agnostic type AST.
///
/// If `substitute_type_name` is set, named types are replaced with
/// references by name rather than being inlined. `force_substitute`
/// additionally substitutes unnamed aggregates, which prevents infinite
/// emission when a generated member function references the type it is
/// defined in.
pub fn stabs_type_to_ast(
    ty: &StabsType,
    state: &StabsToAstState,
    abs_parent_offset_bytes: i32,
    depth: u32,
    substitute_type_name: bool,
    force_substitute: bool,
) -> Result<Box<Node>> {
    if depth > MAX_DEPTH {
        return Err(Error::MaxDepthExceeded(MAX_DEPTH));
    }

    // Make sure that types are replaced with their type name in cases where
    // that is more appropriate than inlining the definition.
    if let Some(name) = &ty.name {
        let try_substitute = depth > 0
            && (ty.is_root
                || matches!(
                    ty.body,
                    Some(StabsTypeBody::Range { .. }) | Some(StabsTypeBody::BuiltIn { .. })
                ));
        let is_name_empty = name.is_empty() || name == " ";
        // Unfortunately, a common case seems to be that __builtin_va_list is
        // indistinguishable from void*, so we prevent it from being output
        // to avoid confusion.
        let is_va_list = name == "__builtin_va_list";
        if (substitute_type_name || try_substitute) && !is_name_empty && !is_va_list {
            // Remember the declared kind of substituted cross references so
            // that a forward declared type can be synthesized if the
            // definition never turns up.
            let forward_declared_kind = match &ty.body {
                Some(StabsTypeBody::CrossReference { kind, .. }) => Some(*kind),
                _ => None,
            };
            let source = if forward_declared_kind.is_some() {
                TypeNameSource::CrossReference
            } else {
                TypeNameSource::Reference
            };
            return Ok(type_name_node(
                source,
                name.clone(),
                Some(state.file_handle),
                ty.number,
                forward_declared_kind,
            ));
        }
    }

    // This prevents infinite recursion when an automatically generated
    // member function references an unnamed type.
    if force_substitute {
        let substitutable = matches!(
            ty.body,
            Some(StabsTypeBody::Enum { .. })
                | Some(StabsTypeBody::Struct { .. })
                | Some(StabsTypeBody::Union { .. })
        );
        if substitutable {
            return Ok(type_name_node(
                TypeNameSource::UnnamedThis,
                ty.name.clone().unwrap_or_default(),
                Some(state.file_handle),
                ty.number,
                None,
            ));
        }
    }

    let Some(body) = &ty.body else {
        // The definition of the type was given previously, so we have to
        // look it up by its type number.
        let number = ty.number.ok_or(Error::AnonymousTypeLookup)?;
        let Some(stabs_type) = state.stabs_types.get(&number) else {
            if state.flags.contains(ImporterFlags::STRICT_PARSING) {
                return Err(Error::UnresolvedTypeNumber(number.file, number.index));
            }
            log::warn!(
                "Failed to lookup STABS type by its type number ({},{}).",
                number.file,
                number.index
            );
            let mut node = Node::new(NodeKind::TypeName(TypeName {
                source: TypeNameSource::Error,
                data_type: None,
                is_forward_declared: false,
                unresolved_stabs: None,
            }));
            node.stabs_type_number = Some(number);
            return Ok(Box::new(node));
        };
        return stabs_type_to_ast(
            stabs_type,
            state,
            abs_parent_offset_bytes,
            depth + 1,
            substitute_type_name,
            force_substitute,
        );
    };

    let node = match body {
        StabsTypeBody::TypeReference(inner) => {
            if ty.number.is_none() || inner.number.is_none() || inner.number != ty.number {
                return stabs_type_to_ast(
                    inner,
                    state,
                    abs_parent_offset_bytes,
                    depth + 1,
                    substitute_type_name,
                    force_substitute,
                );
            }
            // In STABS, void is a reference to itself.
            Node::new(NodeKind::BuiltIn {
                class: BuiltInClass::Void,
            })
        }
        StabsTypeBody::Array {
            index_type,
            element_type,
        } => {
            let element = stabs_type_to_ast(
                element_type,
                state,
                abs_parent_offset_bytes,
                depth + 1,
                true,
                force_substitute,
            )?;
            let Some(StabsTypeBody::Range { low, high, .. }) = &index_type.body else {
                return Err(Error::InvalidArrayIndex);
            };
            let low: i64 = low
                .parse()
                .map_err(|_| Error::CannotParse("low part of array range"))?;
            if low != 0 {
                return Err(Error::InvalidArrayIndex);
            }
            let high: i64 = high
                .parse()
                .map_err(|_| Error::CannotParse("high part of array range"))?;
            // Some compilers wrote out a wrapped around value here for
            // zero-length arrays.
            let element_count = if high == 4294967295 { 0 } else { (high + 1) as i32 };
            Node::new(NodeKind::Array {
                element_type: element,
                element_count,
            })
        }
        StabsTypeBody::Enum { constants } => Node::new(NodeKind::Enum {
            constants: constants.clone(),
        }),
        StabsTypeBody::Function { return_type } => {
            let return_node = stabs_type_to_ast(
                return_type,
                state,
                abs_parent_offset_bytes,
                depth + 1,
                true,
                force_substitute,
            )?;
            Node::new(NodeKind::Function(FunctionType {
                return_type: Some(return_node),
                parameters: None,
                modifier: Default::default(),
                vtable_index: None,
                is_constructor: false,
                definition_handle: None,
            }))
        }
        StabsTypeBody::VolatileQualifier(inner) => {
            let mut node = stabs_type_to_ast(
                inner,
                state,
                abs_parent_offset_bytes,
                depth + 1,
                substitute_type_name,
                force_substitute,
            )?;
            node.is_volatile = true;
            return Ok(node);
        }
        StabsTypeBody::ConstQualifier(inner) => {
            let mut node = stabs_type_to_ast(
                inner,
                state,
                abs_parent_offset_bytes,
                depth + 1,
                substitute_type_name,
                force_substitute,
            )?;
            node.is_const = true;
            return Ok(node);
        }
        StabsTypeBody::Range { low, high, .. } => Node::new(NodeKind::BuiltIn {
            class: classify_range(low, high)?,
        }),
        StabsTypeBody::Struct {
            size,
            base_classes,
            fields,
            member_functions,
            ..
        } => {
            let mut node = struct_or_union_to_ast(
                true,
                base_classes,
                fields,
                member_functions,
                ty.name.as_deref(),
                state,
                abs_parent_offset_bytes,
                depth,
                force_substitute,
            )?;
            node.size_bits = (*size * 8) as i32;
            node
        }
        StabsTypeBody::Union {
            size,
            fields,
            member_functions,
        } => {
            let mut node = struct_or_union_to_ast(
                false,
                &[],
                fields,
                member_functions,
                ty.name.as_deref(),
                state,
                abs_parent_offset_bytes,
                depth,
                force_substitute,
            )?;
            node.size_bits = (*size * 8) as i32;
            node
        }
        StabsTypeBody::CrossReference { kind, identifier } => {
            return Ok(type_name_node(
                TypeNameSource::CrossReference,
                identifier.clone(),
                None,
                None,
                Some(*kind),
            ));
        }
        StabsTypeBody::FloatingPointBuiltIn { bytes, .. } => {
            let class = match bytes {
                2 => BuiltInClass::UnsignedInt16,
                4 => BuiltInClass::UnsignedInt32,
                8 => BuiltInClass::UnsignedInt64,
                16 => BuiltInClass::UnsignedInt128,
                _ => BuiltInClass::UnsignedInt8,
            };
            Node::new(NodeKind::BuiltIn { class })
        }
        StabsTypeBody::Method {
            return_type,
            parameter_types,
            ..
        } => {
            let return_node = stabs_type_to_ast(
                return_type,
                state,
                abs_parent_offset_bytes,
                depth + 1,
                true,
                true,
            )?;
            let mut parameters = Vec::with_capacity(parameter_types.len());
            for parameter_type in parameter_types {
                let parameter = stabs_type_to_ast(
                    parameter_type,
                    state,
                    abs_parent_offset_bytes,
                    depth + 1,
                    true,
                    true,
                )?;
                parameters.push(*parameter);
            }
            Node::new(NodeKind::Function(FunctionType {
                return_type: Some(return_node),
                parameters: Some(parameters),
                modifier: Default::default(),
                vtable_index: None,
                is_constructor: false,
                definition_handle: None,
            }))
        }
        StabsTypeBody::Reference(inner) | StabsTypeBody::Pointer(inner) => {
            let value_type = stabs_type_to_ast(
                inner,
                state,
                abs_parent_offset_bytes,
                depth + 1,
                true,
                force_substitute,
            )?;
            Node::new(NodeKind::PointerOrReference {
                is_pointer: matches!(body, StabsTypeBody::Pointer(_)),
                value_type,
            })
        }
        StabsTypeBody::SizeAttribute { size_bits, inner } => {
            let mut node = stabs_type_to_ast(
                inner,
                state,
                abs_parent_offset_bytes,
                depth + 1,
                substitute_type_name,
                force_substitute,
            )?;
            node.size_bits = *size_bits as i32;
            return Ok(node);
        }
        StabsTypeBody::PointerToDataMember {
            class_type,
            member_type,
        } => {
            let class_node = stabs_type_to_ast(
                class_type,
                state,
                abs_parent_offset_bytes,
                depth + 1,
                true,
                true,
            )?;
            let member_node = stabs_type_to_ast(
                member_type,
                state,
                abs_parent_offset_bytes,
                depth + 1,
                true,
                true,
            )?;
            Node::new(NodeKind::PointerToDataMember {
                class_type: class_node,
                member_type: member_node,
            })
        }
        StabsTypeBody::BuiltIn { type_id } => {
            if *type_id != 16 {
                return Err(Error::UnknownBuiltIn(*type_id));
            }
            Node::new(NodeKind::BuiltIn {
                class: BuiltInClass::Bool8,
            })
        }
    };

    Ok(Box::new(node))
}

/// Like [`stabs_type_to_ast`], but in non-strict mode a conversion failure
/// produces an error type name instead of propagating.
pub fn stabs_type_to_ast_or_error_node(
    ty: &StabsType,
    state: &StabsToAstState,
    substitute_type_name: bool,
    force_substitute: bool,
) -> Result<Box<Node>> {
    match stabs_type_to_ast(ty, state, 0, 0, substitute_type_name, force_substitute) {
        Ok(node) => Ok(node),
        Err(error) => {
            if state.flags.contains(ImporterFlags::STRICT_PARSING) {
                return Err(error);
            }
            log::warn!("Failed to convert STABS type to AST: {error}");
            Ok(Box::new(Node::new(NodeKind::TypeName(TypeName {
                source: TypeNameSource::Error,
                data_type: None,
                is_forward_declared: false,
                unresolved_stabs: None,
            }))))
        }
    }
}

fn type_name_node(
    source: TypeNameSource,
    type_name: String,
    referenced_file: Option<SourceFileHandle>,
    stabs_type_number: Option<TypeNum>,
    forward_declared_kind: Option<ForwardDeclaredKind>,
) -> Box<Node> {
    Box::new(Node::new(NodeKind::TypeName(TypeName {
        source,
        data_type: None,
        is_forward_declared: false,
        unresolved_stabs: Some(Box::new(UnresolvedStabs {
            type_name,
            referenced_file,
            stabs_type_number,
            forward_declared_kind,
        })),
    })))
}

#[allow(clippy::too_many_arguments)]
fn struct_or_union_to_ast(
    is_struct: bool,
    base_classes: &[crate::stabs::StabsBaseClass],
    fields: &[StabsField],
    member_functions: &[StabsMemberFunctionSet],
    type_name: Option<&str>,
    state: &StabsToAstState,
    abs_parent_offset_bytes: i32,
    depth: u32,
    force_substitute: bool,
) -> Result<Node> {
    let mut node = StructOrUnion {
        is_struct,
        base_classes: Vec::with_capacity(base_classes.len()),
        fields: Vec::with_capacity(fields.len()),
        member_functions: Vec::new(),
    };

    for stabs_base_class in base_classes {
        let mut base_class = stabs_type_to_ast(
            &stabs_base_class.ty,
            state,
            abs_parent_offset_bytes,
            depth + 1,
            true,
            force_substitute,
        )?;
        base_class.is_base_class = true;
        base_class.absolute_offset_bytes = stabs_base_class.offset;
        base_class.set_access_specifier(
            visibility_to_access_specifier(stabs_base_class.visibility),
            state.flags,
        );
        node.base_classes.push(*base_class);
    }

    for field in fields {
        node.fields
            .push(field_to_ast(field, state, abs_parent_offset_bytes, depth)?);
    }

    node.member_functions =
        member_functions_to_ast(member_functions, type_name, state, abs_parent_offset_bytes, depth)?;

    Ok(Node::new(NodeKind::StructOrUnion(node)))
}

fn field_to_ast(
    field: &StabsField,
    state: &StabsToAstState,
    abs_parent_offset_bytes: i32,
    depth: u32,
) -> Result<Node> {
    let relative_offset_bytes = field.offset_bits / 8;
    let absolute_offset_bytes = abs_parent_offset_bytes + relative_offset_bytes;

    if detect_bitfield(field, state)? {
        let underlying_type = stabs_type_to_ast(
            &field.ty,
            state,
            absolute_offset_bytes,
            depth + 1,
            true,
            false,
        )?;
        let mut bitfield = Node::new(NodeKind::BitField {
            underlying_type,
            bitfield_offset_bits: field.offset_bits % 8,
        });
        bitfield.name = if field.name == " " {
            String::new()
        } else {
            field.name.clone()
        };
        bitfield.relative_offset_bytes = relative_offset_bytes;
        bitfield.absolute_offset_bytes = absolute_offset_bytes;
        bitfield.size_bits = field.size_bits;
        bitfield.set_access_specifier(visibility_to_access_specifier(field.visibility), state.flags);
        return Ok(bitfield);
    }

    let mut node = stabs_type_to_ast(
        &field.ty,
        state,
        absolute_offset_bytes,
        depth + 1,
        true,
        false,
    )?;
    node.name = field.name.clone();
    node.relative_offset_bytes = relative_offset_bytes;
    node.absolute_offset_bytes = absolute_offset_bytes;
    node.size_bits = field.size_bits;
    node.set_access_specifier(visibility_to_access_specifier(field.visibility), state.flags);

    if field.name.starts_with("$vf")
        || field.name.starts_with("_vptr$")
        || field.name.starts_with("_vptr.")
    {
        node.is_vtable_pointer = true;
    }

    if field.is_static {
        node.storage_class = StorageClass::Static;
    }

    Ok(*node)
}

/// A field is a bitfield iff its declared size differs from the size of its
/// underlying type.
fn detect_bitfield(field: &StabsField, state: &StabsToAstState) -> Result<bool> {
    // Static fields can't be bitfields.
    if field.is_static {
        return Ok(false);
    }

    // Resolve type references, following aliases through const and volatile
    // qualifiers. Give up if a cycle forms.
    let mut ty: &StabsType = &field.ty;
    for step in 0..MAX_BITFIELD_RESOLVE_STEPS {
        match &ty.body {
            None => {
                let Some(number) = ty.number else {
                    return Ok(false);
                };
                let Some(&next) = state.stabs_types.get(&number) else {
                    return Ok(false);
                };
                if std::ptr::eq(next as *const StabsType, ty as *const StabsType) {
                    return Ok(false);
                }
                ty = next;
            }
            Some(StabsTypeBody::TypeReference(inner))
            | Some(StabsTypeBody::ConstQualifier(inner))
            | Some(StabsTypeBody::VolatileQualifier(inner)) => ty = inner,
            Some(_) => break,
        }
        if step == MAX_BITFIELD_RESOLVE_STEPS - 1 {
            return Ok(false);
        }
    }

    let underlying_type_size_bits = match &ty.body {
        Some(StabsTypeBody::Range { low, high, .. }) => {
            builtin_class_size(classify_range(low, high)?) * 8
        }
        Some(StabsTypeBody::CrossReference { kind, .. }) => {
            if *kind == ForwardDeclaredKind::Enum {
                32
            } else {
                return Ok(false);
            }
        }
        Some(StabsTypeBody::SizeAttribute { size_bits, .. }) => *size_bits as i32,
        Some(StabsTypeBody::BuiltIn { .. }) => 8,
        _ => return Ok(false),
    };

    if underlying_type_size_bits == 0 {
        return Ok(false);
    }

    Ok(field.size_bits != underlying_type_size_bits)
}

fn member_functions_to_ast(
    member_functions: &[StabsMemberFunctionSet],
    type_name: Option<&str>,
    state: &StabsToAstState,
    abs_parent_offset_bytes: i32,
    depth: u32,
) -> Result<Vec<Node>> {
    if state.flags.contains(ImporterFlags::NO_MEMBER_FUNCTIONS) {
        return Ok(Vec::new());
    }

    let type_name_no_template_args =
        type_name.map(|name| &name[..name.find('<').unwrap_or(name.len())]);

    if !state
        .flags
        .contains(ImporterFlags::INCLUDE_GENERATED_MEMBER_FUNCTIONS)
        && only_special_functions(member_functions, type_name_no_template_args)
    {
        return Ok(Vec::new());
    }

    let mut output = Vec::new();
    for function_set in member_functions {
        for stabs_function in &function_set.overloads {
            let mut node = stabs_type_to_ast(
                &stabs_function.ty,
                state,
                abs_parent_offset_bytes,
                depth + 1,
                true,
                true,
            )?;
            if function_set.name == "__as" {
                node.name = "operator=".to_string();
            } else {
                node.name = function_set.name.clone();
            }
            if let NodeKind::Function(function) = &mut node.kind {
                function.modifier = stabs_function.modifier;
                function.is_constructor = Some(function_set.name.as_str()) == type_name
                    || Some(function_set.name.as_str()) == type_name_no_template_args;
                function.vtable_index = stabs_function.vtable_index;
            }
            node.set_access_specifier(
                visibility_to_access_specifier(stabs_function.visibility),
                state.flags,
            );
            output.push(*node);
        }
    }

    Ok(output)
}

/// Detect types whose only member functions were generated by the compiler:
/// assignment operators, vtable helpers and parameterless constructors.
fn only_special_functions(
    member_functions: &[StabsMemberFunctionSet],
    type_name_no_template_args: Option<&str>,
) -> bool {
    for function_set in member_functions {
        for stabs_function in &function_set.overloads {
            let parameter_count = match &stabs_function.ty.body {
                Some(StabsTypeBody::Method {
                    parameter_types, ..
                }) => parameter_types.len(),
                Some(StabsTypeBody::Function { .. }) => 0,
                _ => continue,
            };
            let name = function_set.name.as_str();
            let is_special = name == "__as"
                || name == "operator="
                || name.starts_with('$')
                || (Some(name) == type_name_no_template_args && parameter_count == 0);
            if !is_special {
                return false;
            }
        }
    }
    true
}

pub fn visibility_to_access_specifier(visibility: StabsFieldVisibility) -> AccessSpecifier {
    match visibility {
        StabsFieldVisibility::None => AccessSpecifier::Public,
        StabsFieldVisibility::Public => AccessSpecifier::Public,
        StabsFieldVisibility::Protected => AccessSpecifier::Protected,
        StabsFieldVisibility::Private => AccessSpecifier::Private,
        StabsFieldVisibility::PublicOptimizedOut => AccessSpecifier::Public,
    }
}

/// Map the bounds of a range type onto one of the built-in type classes.
fn classify_range(low: &str, high: &str) -> Result<BuiltInClass> {
    // Handle special cases and values that are too large to store in a
    // 64-bit integer.
    const STRINGS: &[(&str, &str, BuiltInClass)] = &[
        ("4", "0", BuiltInClass::Float32),
        (
            "000000000000000000000000",
            "001777777777777777777777",
            BuiltInClass::UnsignedInt64,
        ),
        (
            "00000000000000000000000000000000000000000000",
            "00000000000000000000001777777777777777777777",
            BuiltInClass::UnsignedInt64,
        ),
        // IOP
        (
            "0000000000000",
            "01777777777777777777777",
            BuiltInClass::UnsignedInt64,
        ),
        ("0", "18446744073709551615", BuiltInClass::UnsignedInt64),
        (
            "001000000000000000000000",
            "000777777777777777777777",
            BuiltInClass::SignedInt64,
        ),
        (
            "00000000000000000000001000000000000000000000",
            "00000000000000000000000777777777777777777777",
            BuiltInClass::SignedInt64,
        ),
        // IOP
        (
            "01000000000000000000000",
            "0777777777777777777777",
            BuiltInClass::SignedInt64,
        ),
        (
            "-9223372036854775808",
            "9223372036854775807",
            BuiltInClass::SignedInt64,
        ),
        ("8", "0", BuiltInClass::Float64),
        (
            "00000000000000000000000000000000000000000000",
            "03777777777777777777777777777777777777777777",
            BuiltInClass::UnsignedInt128,
        ),
        (
            "02000000000000000000000000000000000000000000",
            "01777777777777777777777777777777777777777777",
            BuiltInClass::SignedInt128,
        ),
        (
            "000000000000000000000000",
            "0377777777777777777777777777777777",
            BuiltInClass::UnqualifiedInt128,
        ),
        ("16", "0", BuiltInClass::Float128),
        // Old homebrew toolchain.
        ("0", "-1", BuiltInClass::UnqualifiedInt128),
    ];

    for (low_string, high_string, class) in STRINGS {
        if low == *low_string && high == *high_string {
            return Ok(*class);
        }
    }

    // For smaller values we actually parse the bounds as integers. A
    // leading zero indicates octal.
    let low_value = parse_range_bound(low)
        .ok_or_else(|| Error::UnclassifiableRange(low.to_string(), high.to_string()))?;
    let high_value = parse_range_bound(high)
        .ok_or_else(|| Error::UnclassifiableRange(low.to_string(), high.to_string()))?;

    const INTEGERS: &[(i64, i64, BuiltInClass)] = &[
        (0, 255, BuiltInClass::UnsignedInt8),
        (-128, 127, BuiltInClass::SignedInt8),
        (0, 127, BuiltInClass::UnqualifiedInt8),
        (0, 65535, BuiltInClass::UnsignedInt16),
        (-32768, 32767, BuiltInClass::SignedInt16),
        (0, 4294967295, BuiltInClass::UnsignedInt32),
        (-2147483648, 2147483647, BuiltInClass::SignedInt32),
    ];

    for (low_bound, high_bound, class) in INTEGERS {
        if (*low_bound == low_value || *low_bound == -low_value) && *high_bound == high_value {
            return Ok(*class);
        }
    }

    Err(Error::UnclassifiableRange(
        low.to_string(),
        high.to_string(),
    ))
}

fn parse_range_bound(bound: &str) -> Option<i64> {
    let radix = if bound.starts_with('0') && bound.len() > 1 {
        8
    } else {
        10
    };
    i64::from_str_radix(bound, radix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stabs::parse_stabs_symbol;
    use crate::stabs::StabsSymbol;

    fn lower(symbols: &[&str], root: usize) -> Box<Node> {
        let parsed: Vec<StabsSymbol> = symbols
            .iter()
            .map(|input| parse_stabs_symbol(input).expect("parse"))
            .collect();
        let mut stabs_types = BTreeMap::new();
        for symbol in &parsed {
            symbol.ty.enumerate_numbered_types(&mut stabs_types);
        }
        let state = StabsToAstState {
            file_handle: crate::database::SymbolHandle::new(0),
            stabs_types: &stabs_types,
            flags: ImporterFlags::STRICT_PARSING,
        };
        stabs_type_to_ast(&parsed[root].ty, &state, 0, 0, false, false).expect("lower")
    }

    #[test]
    fn classify_common_ranges() {
        assert_eq!(
            BuiltInClass::SignedInt32,
            classify_range("-2147483648", "2147483647").unwrap()
        );
        assert_eq!(
            BuiltInClass::UnqualifiedInt8,
            classify_range("0", "127").unwrap()
        );
        assert_eq!(BuiltInClass::Float32, classify_range("4", "0").unwrap());
        assert_eq!(
            BuiltInClass::UnsignedInt64,
            classify_range("0", "18446744073709551615").unwrap()
        );
        assert_eq!(
            BuiltInClass::UnsignedInt64,
            classify_range("0000000000000", "01777777777777777777777").unwrap()
        );
        assert_eq!(
            BuiltInClass::UnqualifiedInt128,
            classify_range("0", "-1").unwrap()
        );
        assert!(classify_range("1", "banana").is_err());
    }

    #[test]
    fn multi_dimensional_array_element_counts() {
        let node = lower(
            &["Array:t(1,1)=(1,2)=ar(1,3)=r(1,3);0;4294967295;;0;0;(1,4)=ar(1,3);0;1;(1,5)=ar(1,3);0;2;(0,1)",
              "int:t(0,1)=r(0,1);-2147483648;2147483647;"],
            0,
        );
        let NodeKind::Array {
            element_type,
            element_count,
        } = &node.kind
        else {
            panic!("expected an array");
        };
        assert_eq!(1, *element_count);
        let NodeKind::Array {
            element_type,
            element_count,
        } = &element_type.kind
        else {
            panic!("expected an inner array");
        };
        assert_eq!(2, *element_count);
        let NodeKind::Array { element_count, .. } = &element_type.kind else {
            panic!("expected an innermost array");
        };
        assert_eq!(3, *element_count);
    }

    #[test]
    fn void_is_a_reference_to_itself() {
        let node = lower(&["VexingVoid:t1=1"], 0);
        assert!(matches!(
            node.kind,
            NodeKind::BuiltIn {
                class: BuiltInClass::Void
            }
        ));
    }

    #[test]
    fn struct_field_offsets_and_sizes() {
        let node = lower(
            &[
                "SimpleStruct:T(1,1)=s4a:(0,1),0,32;;",
                "int:t(0,1)=r(0,1);-2147483648;2147483647;",
            ],
            0,
        );
        assert_eq!(32, node.size_bits);
        let NodeKind::StructOrUnion(struct_or_union) = &node.kind else {
            panic!("expected a struct");
        };
        assert!(struct_or_union.is_struct);
        assert_eq!(1, struct_or_union.fields.len());
        let field = &struct_or_union.fields[0];
        assert_eq!("a", field.name);
        assert_eq!(0, field.relative_offset_bytes);
        assert_eq!(32, field.size_bits);
        assert!(matches!(field.kind, NodeKind::TypeName(_)));
    }

    #[test]
    fn bitfield_detection() {
        let node = lower(
            &[
                "Flags:T(1,1)=s4a:(0,1),0,1;b:(0,1),1,3;c:(0,1),4,28;;",
                "int:t(0,1)=r(0,1);-2147483648;2147483647;",
            ],
            0,
        );
        let NodeKind::StructOrUnion(struct_or_union) = &node.kind else {
            panic!("expected a struct");
        };
        assert_eq!(3, struct_or_union.fields.len());
        let NodeKind::BitField {
            bitfield_offset_bits,
            ..
        } = &struct_or_union.fields[1].kind
        else {
            panic!("expected a bitfield");
        };
        assert_eq!(1, *bitfield_offset_bits);
        assert_eq!(3, struct_or_union.fields[1].size_bits);

        // A full-width field is not a bitfield.
        let node = lower(
            &[
                "NotFlags:T(1,1)=s4a:(0,1),0,32;;",
                "int:t(0,1)=r(0,1);-2147483648;2147483647;",
            ],
            0,
        );
        let NodeKind::StructOrUnion(struct_or_union) = &node.kind else {
            panic!("expected a struct");
        };
        assert!(!matches!(
            struct_or_union.fields[0].kind,
            NodeKind::BitField { .. }
        ));
    }

    #[test]
    fn member_function_this_references_are_substituted() {
        // A generated member function of an unnamed struct references the
        // struct itself through a reference parameter.
        let symbols = [
            "ReturnType:t(0,1)=r1;-2147483648;2147483647;",
            "PeculiarParameter:t(1,1)=s1;some_generated_func::#(1,1),(0,1),(1,2)=&(1,3)=s1;some_generated_func::#(1,1),(0,1),(1,2);:RC17PeculiarParameter;2A.;;;:RC17PeculiarParameter;2A.;;",
        ];
        let parsed: Vec<StabsSymbol> = symbols
            .iter()
            .map(|input| parse_stabs_symbol(input).expect("parse"))
            .collect();
        let mut stabs_types = BTreeMap::new();
        for symbol in &parsed {
            symbol.ty.enumerate_numbered_types(&mut stabs_types);
        }
        let state = StabsToAstState {
            file_handle: crate::database::SymbolHandle::new(0),
            stabs_types: &stabs_types,
            flags: ImporterFlags::STRICT_PARSING
                | ImporterFlags::INCLUDE_GENERATED_MEMBER_FUNCTIONS,
        };
        let node =
            stabs_type_to_ast(&parsed[1].ty, &state, 0, 0, false, false).expect("lower");

        let NodeKind::StructOrUnion(structure) = &node.kind else {
            panic!("expected a struct");
        };
        assert_eq!(1, structure.member_functions.len());
        let NodeKind::Function(function) = &structure.member_functions[0].kind else {
            panic!("expected a function");
        };
        let parameters = function.parameters.as_ref().expect("parameters");
        assert_eq!(1, parameters.len());
        let NodeKind::PointerOrReference { value_type, .. } = &parameters[0].kind else {
            panic!("expected a reference");
        };
        assert!(matches!(value_type.kind, NodeKind::TypeName(_)));
    }
}
