use std::collections::BTreeMap;

use crate::Error;
use crate::Result;

/// A STABS type number.
///
/// These are used to reference STABS types from other types within a single
/// translation unit. For most games this is just a single number. In some
/// cases, for example with the homebrew SDK, type numbers are a pair of two
/// numbers surrounded by round brackets e.g. `(1,23)` where the first number
/// is the index of the include file and the second is the type number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TypeNum {
    pub file: i32,
    pub index: i32,
}

impl TypeNum {
    pub fn single(index: i32) -> Self {
        Self { file: -1, index }
    }
}

/// One node in a parsed STABS type tree.
///
/// For example in `123=*456`, 123 is the type number, the body is a pointer,
/// and the pointed-to type is a body-less reference to type number 456.
#[derive(Debug)]
pub struct StabsType {
    /// `None` if no number was assigned (the type is anonymous).
    pub number: Option<TypeNum>,
    /// Only populated for root types and cross references.
    pub name: Option<String>,
    pub is_typedef: bool,
    pub is_root: bool,
    /// `None` for a bare reference to a previously defined type.
    pub body: Option<StabsTypeBody>,
}

#[derive(Debug)]
pub enum StabsTypeBody {
    /// Digits or `(` directly after the `=`.
    TypeReference(Box<StabsType>),
    /// `a`
    Array {
        index_type: Box<StabsType>,
        element_type: Box<StabsType>,
    },
    /// `e`
    Enum { constants: Vec<(i32, String)> },
    /// `f`
    Function { return_type: Box<StabsType> },
    /// `B`
    VolatileQualifier(Box<StabsType>),
    /// `k`
    ConstQualifier(Box<StabsType>),
    /// `r`; the bounds are kept as text because some of them overflow s64.
    Range {
        inner: Box<StabsType>,
        low: String,
        high: String,
    },
    /// `s`
    Struct {
        size: i64,
        base_classes: Vec<StabsBaseClass>,
        fields: Vec<StabsField>,
        member_functions: Vec<StabsMemberFunctionSet>,
        first_base_class: Option<Box<StabsType>>,
    },
    /// `u`
    Union {
        size: i64,
        fields: Vec<StabsField>,
        member_functions: Vec<StabsMemberFunctionSet>,
    },
    /// `x`
    CrossReference {
        kind: ForwardDeclaredKind,
        identifier: String,
    },
    /// `R`
    FloatingPointBuiltIn { class: i32, bytes: i32 },
    /// `#`
    Method {
        class_type: Option<Box<StabsType>>,
        return_type: Box<StabsType>,
        parameter_types: Vec<StabsType>,
    },
    /// `&`
    Reference(Box<StabsType>),
    /// `*`
    Pointer(Box<StabsType>),
    /// `@` followed by `s`
    SizeAttribute {
        size_bits: i64,
        inner: Box<StabsType>,
    },
    /// `@` followed by a type number
    PointerToDataMember {
        class_type: Box<StabsType>,
        member_type: Box<StabsType>,
    },
    /// `-`
    BuiltIn { type_id: i64 },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ForwardDeclaredKind {
    Enum,
    Struct,
    Union,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum StabsFieldVisibility {
    #[default]
    None,
    Private,
    Protected,
    Public,
    PublicOptimizedOut,
}

impl StabsFieldVisibility {
    fn from_char(c: u8) -> Option<Self> {
        match c {
            b'0' => Some(Self::Private),
            b'1' => Some(Self::Protected),
            b'2' => Some(Self::Public),
            b'9' => Some(Self::PublicOptimizedOut),
            0 => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct StabsBaseClass {
    pub visibility: StabsFieldVisibility,
    pub offset: i32,
    pub ty: Box<StabsType>,
}

#[derive(Debug)]
pub struct StabsField {
    pub name: String,
    pub visibility: StabsFieldVisibility,
    pub ty: Box<StabsType>,
    pub is_static: bool,
    pub offset_bits: i32,
    pub size_bits: i32,
    /// Only set for static fields.
    pub type_name: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum MemberFunctionModifier {
    #[default]
    None,
    Static,
    Virtual,
}

#[derive(Debug)]
pub struct StabsMemberFunction {
    pub ty: Box<StabsType>,
    pub visibility: StabsFieldVisibility,
    pub is_const: bool,
    pub is_volatile: bool,
    pub modifier: MemberFunctionModifier,
    pub vtable_index: Option<i32>,
    pub virtual_type: Option<Box<StabsType>>,
}

#[derive(Debug)]
pub struct StabsMemberFunctionSet {
    pub name: String,
    pub overloads: Vec<StabsMemberFunction>,
}

impl StabsType {
    fn bodyless(number: TypeNum) -> Self {
        Self {
            number: Some(number),
            name: None,
            is_typedef: false,
            is_root: false,
            body: None,
        }
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Collect all the numbered definitions in this tree, so that body-less
    /// references can be resolved later. The first definition of a given
    /// number wins.
    pub fn enumerate_numbered_types<'a>(&'a self, output: &mut BTreeMap<TypeNum, &'a StabsType>) {
        if let (Some(number), true) = (self.number, self.has_body()) {
            output.entry(number).or_insert(self);
        }
        match &self.body {
            None => {}
            Some(StabsTypeBody::TypeReference(inner))
            | Some(StabsTypeBody::VolatileQualifier(inner))
            | Some(StabsTypeBody::ConstQualifier(inner))
            | Some(StabsTypeBody::Reference(inner))
            | Some(StabsTypeBody::Pointer(inner)) => inner.enumerate_numbered_types(output),
            Some(StabsTypeBody::Array {
                index_type,
                element_type,
            }) => {
                index_type.enumerate_numbered_types(output);
                element_type.enumerate_numbered_types(output);
            }
            Some(StabsTypeBody::Enum { .. }) => {}
            Some(StabsTypeBody::Function { return_type }) => {
                return_type.enumerate_numbered_types(output);
            }
            Some(StabsTypeBody::Range { inner, .. }) => inner.enumerate_numbered_types(output),
            Some(StabsTypeBody::Struct {
                base_classes,
                fields,
                member_functions,
                first_base_class,
                ..
            }) => {
                for base_class in base_classes {
                    base_class.ty.enumerate_numbered_types(output);
                }
                for field in fields {
                    field.ty.enumerate_numbered_types(output);
                }
                for set in member_functions {
                    for overload in &set.overloads {
                        overload.ty.enumerate_numbered_types(output);
                    }
                }
                if let Some(first_base_class) = first_base_class {
                    first_base_class.enumerate_numbered_types(output);
                }
            }
            Some(StabsTypeBody::Union {
                fields,
                member_functions,
                ..
            }) => {
                for field in fields {
                    field.ty.enumerate_numbered_types(output);
                }
                for set in member_functions {
                    for overload in &set.overloads {
                        overload.ty.enumerate_numbered_types(output);
                    }
                }
            }
            Some(StabsTypeBody::CrossReference { .. }) => {}
            Some(StabsTypeBody::FloatingPointBuiltIn { .. }) => {}
            Some(StabsTypeBody::Method {
                class_type,
                return_type,
                parameter_types,
            }) => {
                if let Some(class_type) = class_type {
                    class_type.enumerate_numbered_types(output);
                }
                return_type.enumerate_numbered_types(output);
                for parameter_type in parameter_types {
                    parameter_type.enumerate_numbered_types(output);
                }
            }
            Some(StabsTypeBody::SizeAttribute { inner, .. }) => {
                inner.enumerate_numbered_types(output);
            }
            Some(StabsTypeBody::PointerToDataMember {
                class_type,
                member_type,
            }) => {
                class_type.enumerate_numbered_types(output);
                member_type.enumerate_numbered_types(output);
            }
            Some(StabsTypeBody::BuiltIn { .. }) => {}
        }
    }
}

/// A mutable cursor over the text of a stab.
///
/// STABS overloads colons, semicolons, commas and angle brackets heavily, so
/// all the lexical quirks are concentrated here.
pub struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    pub fn eat_char(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    pub fn expect_char(&mut self, expected: u8, subject: &'static str) -> Result<()> {
        match self.eat_char() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(Error::ExpectedChar {
                expected: expected as char,
                got: c as char,
                subject,
            }),
            None => Err(Error::UnexpectedEof(subject)),
        }
    }

    /// Base 10 signed integer literal. Fails if no digits were consumed.
    pub fn eat_s64_literal(&mut self) -> Option<i64> {
        let negative = self.peek() == Some(b'-');
        let digits_start = self.pos + negative as usize;
        let mut end = digits_start;
        while self.input.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
        }
        if end == digits_start {
            return None;
        }
        let mut value: i64 = 0;
        for &digit in &self.input[digits_start..end] {
            value = value
                .saturating_mul(10)
                .saturating_add((digit - b'0') as i64);
        }
        self.pos = end;
        Some(if negative { value.saturating_neg() } else { value })
    }

    pub fn eat_s32_literal(&mut self) -> Option<i32> {
        self.eat_s64_literal().map(|value| value as i32)
    }

    /// An ordinary identifier, terminated by `:` or `;`.
    pub fn eat_stabs_identifier(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b':' || c == b';' {
                let bytes = &self.input[start..self.pos];
                return Ok(String::from_utf8_lossy(bytes).into_owned());
            }
            self.advance();
        }
        Err(Error::UnexpectedEof("identifier"))
    }

    /// Like [`Cursor::eat_stabs_identifier`], except that the input may
    /// contain an unescaped namespace separator `::` or template argument
    /// list even though the field terminator is supposed to be a colon, so a
    /// colon only terminates the identifier outside of angle brackets.
    pub fn eat_dodgy_stabs_identifier(&mut self) -> Result<String> {
        let start = self.pos;
        let mut template_depth: i32 = 0;
        while let Some(c) = self.peek() {
            if c == b'<' {
                template_depth += 1;
            }
            if c == b'>' {
                template_depth -= 1;
            }
            if (c == b':' && template_depth == 0) || c == b';' {
                let bytes = &self.input[start..self.pos];
                return Ok(String::from_utf8_lossy(bytes).into_owned());
            }
            self.advance();
        }
        Err(Error::UnexpectedEof("identifier"))
    }
}

/// A single character following the colon in `NAME:...`, selecting the kind
/// of entity the stab describes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StabsSymbolDescriptor {
    /// `_` or a digit.
    LocalVariable,
    /// `a`, reference parameter passed by address.
    ReferenceParameterA,
    /// `f`
    LocalFunction,
    /// `F`
    GlobalFunction,
    /// `G`, address taken from the external symbol table.
    GlobalVariable,
    /// `P`
    RegisterParameter,
    /// `p`
    ValueParameter,
    /// `r`
    RegisterVariable,
    /// `S`, address taken from this stab.
    StaticGlobalVariable,
    /// `t`
    TypeName,
    /// `T`
    EnumStructOrTypeTag,
    /// `V`
    StaticLocalVariable,
    /// `v`, reference parameter passed by value-pointer.
    ReferenceParameterV,
}

impl StabsSymbolDescriptor {
    fn from_char(c: u8) -> Result<Self> {
        match c {
            b'_' => Ok(Self::LocalVariable),
            b'a' => Ok(Self::ReferenceParameterA),
            b'f' => Ok(Self::LocalFunction),
            b'F' => Ok(Self::GlobalFunction),
            b'G' => Ok(Self::GlobalVariable),
            b'P' => Ok(Self::RegisterParameter),
            b'p' => Ok(Self::ValueParameter),
            b'r' => Ok(Self::RegisterVariable),
            b'S' => Ok(Self::StaticGlobalVariable),
            b't' => Ok(Self::TypeName),
            b'T' => Ok(Self::EnumStructOrTypeTag),
            b'V' => Ok(Self::StaticLocalVariable),
            b'v' => Ok(Self::ReferenceParameterV),
            _ => Err(Error::UnknownSymbolDescriptor(c as char)),
        }
    }
}

/// A fully parsed `name:descriptor...` stab payload.
#[derive(Debug)]
pub struct StabsSymbol {
    pub name: String,
    pub descriptor: StabsSymbolDescriptor,
    pub ty: Box<StabsType>,
}

pub fn parse_stabs_symbol(input: &str) -> Result<StabsSymbol> {
    let mut cursor = Cursor::new(input);

    let name = cursor.eat_dodgy_stabs_identifier()?;
    cursor.expect_char(b':', "identifier")?;

    let descriptor = match cursor.peek() {
        None => return Err(Error::UnexpectedEof("symbol descriptor")),
        Some(c) if c.is_ascii_digit() => StabsSymbolDescriptor::LocalVariable,
        Some(c) => {
            cursor.advance();
            StabsSymbolDescriptor::from_char(c)?
        }
    };

    // Some old compilers emit a stray 't' between the descriptor and the
    // type number.
    if descriptor != StabsSymbolDescriptor::LocalVariable && cursor.peek() == Some(b't') {
        cursor.advance();
    }

    let mut ty = parse_top_level_stabs_type(&mut cursor)?;

    // Ensure that variable names don't become type names e.g. the stab
    // "somevar:P123=*456" may be referenced by the type number 123, but the
    // type name is not "somevar".
    let is_type = matches!(
        descriptor,
        StabsSymbolDescriptor::TypeName | StabsSymbolDescriptor::EnumStructOrTypeTag
    );
    if is_type {
        ty.name = Some(name.clone());
    }
    ty.is_typedef = descriptor == StabsSymbolDescriptor::TypeName;
    ty.is_root = true;

    Ok(StabsSymbol {
        name,
        descriptor,
        ty,
    })
}

pub fn parse_top_level_stabs_type(cursor: &mut Cursor) -> Result<Box<StabsType>> {
    let mut ty = parse_stabs_type(cursor)?;

    // Handle first base class suffixes.
    if let Some(StabsTypeBody::Struct {
        first_base_class, ..
    }) = &mut ty.body
    {
        if cursor.peek() == Some(b'~') && cursor.peek_at(1) == Some(b'%') {
            cursor.advance();
            cursor.advance();
            *first_base_class = Some(parse_stabs_type(cursor)?);
            cursor.expect_char(b';', "first base class suffix")?;
        }
    }

    // Handle extra live range information. The values are consumed silently.
    if cursor.peek() == Some(b';') && cursor.peek_at(1) == Some(b'l') {
        cursor.advance();
        cursor.advance();
        cursor.expect_char(b'(', "live range suffix")?;
        cursor.expect_char(b'#', "live range suffix")?;
        cursor
            .eat_s32_literal()
            .ok_or(Error::CannotParse("live range suffix"))?;
        cursor.expect_char(b',', "live range suffix")?;
        cursor.expect_char(b'#', "live range suffix")?;
        cursor
            .eat_s32_literal()
            .ok_or(Error::CannotParse("live range suffix"))?;
        cursor.expect_char(b')', "live range suffix")?;
    }

    Ok(ty)
}

fn parse_stabs_type(cursor: &mut Cursor) -> Result<Box<StabsType>> {
    let number = match cursor.peek() {
        None => return Err(Error::UnexpectedEof("type number")),
        Some(b'(') => {
            // This file has type numbers made up of two pieces: an include
            // file index and a type number.
            cursor.advance();
            let file = cursor
                .eat_s32_literal()
                .ok_or(Error::CannotParse("file number"))?;
            cursor.expect_char(b',', "type number")?;
            let index = cursor
                .eat_s32_literal()
                .ok_or(Error::CannotParse("type number"))?;
            cursor.expect_char(b')', "type number")?;
            Some(TypeNum { file, index })
        }
        Some(c) if c.is_ascii_digit() => {
            // This file has type numbers which are just a single number.
            // This is the more common case for games.
            let index = cursor
                .eat_s32_literal()
                .ok_or(Error::CannotParse("type number"))?;
            Some(TypeNum::single(index))
        }
        Some(_) => None,
    };

    if let Some(number) = number {
        if cursor.peek() != Some(b'=') {
            return Ok(Box::new(StabsType::bodyless(number)));
        }
        cursor.advance();
    }

    let descriptor = match cursor.peek() {
        None => return Err(Error::UnexpectedEof("type descriptor")),
        Some(c) if c.is_ascii_digit() || c == b'(' => None,
        Some(c) => {
            cursor.advance();
            Some(c)
        }
    };

    let body = match descriptor {
        None => StabsTypeBody::TypeReference(parse_stabs_type(cursor)?),
        Some(b'a') => {
            let index_type = parse_stabs_type(cursor)?;
            let element_type = parse_stabs_type(cursor)?;
            StabsTypeBody::Array {
                index_type,
                element_type,
            }
        }
        Some(b'e') => {
            let mut constants = Vec::new();
            loop {
                match cursor.peek() {
                    None => return Err(Error::UnexpectedEof("enum")),
                    Some(b';') => {
                        cursor.advance();
                        break;
                    }
                    Some(_) => {
                        let name = cursor.eat_dodgy_stabs_identifier()?;
                        cursor.expect_char(b':', "enum")?;
                        let value = cursor
                            .eat_s32_literal()
                            .ok_or(Error::CannotParse("enum value"))?;
                        constants.push((value, name));
                        cursor.expect_char(b',', "enum")?;
                    }
                }
            }
            StabsTypeBody::Enum { constants }
        }
        Some(b'f') => StabsTypeBody::Function {
            return_type: parse_stabs_type(cursor)?,
        },
        Some(b'B') => StabsTypeBody::VolatileQualifier(parse_stabs_type(cursor)?),
        Some(b'k') => StabsTypeBody::ConstQualifier(parse_stabs_type(cursor)?),
        Some(b'r') => {
            let inner = parse_stabs_type(cursor)?;
            cursor.expect_char(b';', "range type descriptor")?;
            let low = cursor.eat_dodgy_stabs_identifier()?;
            cursor.expect_char(b';', "low range value")?;
            let high = cursor.eat_dodgy_stabs_identifier()?;
            cursor.expect_char(b';', "high range value")?;
            StabsTypeBody::Range { inner, low, high }
        }
        Some(b's') => {
            let size = cursor
                .eat_s64_literal()
                .ok_or(Error::CannotParse("struct size"))?;
            let mut base_classes = Vec::new();
            if cursor.peek() == Some(b'!') {
                cursor.advance();
                let base_class_count = cursor
                    .eat_s32_literal()
                    .ok_or(Error::CannotParse("base class count"))?;
                cursor.expect_char(b',', "base class section")?;
                for _ in 0..base_class_count {
                    // The first character is the is-virtual flag.
                    cursor.eat_char();
                    let visibility_char = cursor
                        .eat_char()
                        .ok_or(Error::UnexpectedEof("base class visibility"))?;
                    let visibility = StabsFieldVisibility::from_char(visibility_char)
                        .ok_or(Error::InvalidFieldVisibility(visibility_char as char))?;
                    let offset = cursor
                        .eat_s32_literal()
                        .ok_or(Error::CannotParse("base class offset"))?;
                    cursor.expect_char(b',', "base class section")?;
                    let ty = parse_stabs_type(cursor)?;
                    cursor.expect_char(b';', "base class section")?;
                    base_classes.push(StabsBaseClass {
                        visibility,
                        offset,
                        ty,
                    });
                }
            }
            let fields = parse_field_list(cursor)?;
            let member_functions = parse_member_functions(cursor)?;
            StabsTypeBody::Struct {
                size,
                base_classes,
                fields,
                member_functions,
                first_base_class: None,
            }
        }
        Some(b'u') => {
            let size = cursor
                .eat_s64_literal()
                .ok_or(Error::CannotParse("union size"))?;
            let fields = parse_field_list(cursor)?;
            let member_functions = parse_member_functions(cursor)?;
            StabsTypeBody::Union {
                size,
                fields,
                member_functions,
            }
        }
        Some(b'x') => {
            let kind = match cursor.eat_char() {
                None => return Err(Error::UnexpectedEof("cross reference")),
                Some(b'e') => ForwardDeclaredKind::Enum,
                Some(b's') => ForwardDeclaredKind::Struct,
                Some(b'u') => ForwardDeclaredKind::Union,
                Some(c) => return Err(Error::InvalidCrossReferenceType(c as char)),
            };
            let identifier = cursor.eat_dodgy_stabs_identifier()?;
            cursor.expect_char(b':', "cross reference")?;
            StabsTypeBody::CrossReference { kind, identifier }
        }
        Some(b'R') => {
            let class = cursor
                .eat_s32_literal()
                .ok_or(Error::CannotParse("floating point built-in class"))?;
            cursor.expect_char(b';', "floating point builtin")?;
            let bytes = cursor
                .eat_s32_literal()
                .ok_or(Error::CannotParse("floating point built-in"))?;
            cursor.expect_char(b';', "floating point builtin")?;
            cursor
                .eat_s32_literal()
                .ok_or(Error::CannotParse("floating point built-in"))?;
            cursor.expect_char(b';', "floating point builtin")?;
            StabsTypeBody::FloatingPointBuiltIn { class, bytes }
        }
        Some(b'#') => {
            if cursor.peek() == Some(b'#') {
                cursor.advance();
                let return_type = parse_stabs_type(cursor)?;
                if cursor.peek() == Some(b';') {
                    cursor.advance();
                }
                StabsTypeBody::Method {
                    class_type: None,
                    return_type,
                    parameter_types: Vec::new(),
                }
            } else {
                let class_type = parse_stabs_type(cursor)?;
                cursor.expect_char(b',', "method")?;
                let return_type = parse_stabs_type(cursor)?;
                let mut parameter_types = Vec::new();
                loop {
                    match cursor.peek() {
                        None => break,
                        Some(b';') => {
                            cursor.advance();
                            break;
                        }
                        Some(_) => {
                            cursor.expect_char(b',', "method")?;
                            parameter_types.push(*parse_stabs_type(cursor)?);
                        }
                    }
                }
                StabsTypeBody::Method {
                    class_type: Some(class_type),
                    return_type,
                    parameter_types,
                }
            }
        }
        Some(b'&') => StabsTypeBody::Reference(parse_stabs_type(cursor)?),
        Some(b'*') => StabsTypeBody::Pointer(parse_stabs_type(cursor)?),
        Some(b'@') => {
            let next = cursor.peek();
            if next.is_some_and(|c| c.is_ascii_digit() || c == b'(') {
                let class_type = parse_stabs_type(cursor)?;
                cursor.expect_char(b',', "pointer to non-static data member")?;
                let member_type = parse_stabs_type(cursor)?;
                StabsTypeBody::PointerToDataMember {
                    class_type,
                    member_type,
                }
            } else {
                if next != Some(b's') {
                    return Err(Error::InvalidTypeAttribute);
                }
                cursor.advance();
                let size_bits = cursor
                    .eat_s64_literal()
                    .ok_or(Error::CannotParse("type attribute"))?;
                cursor.expect_char(b';', "type attribute")?;
                let inner = parse_stabs_type(cursor)?;
                StabsTypeBody::SizeAttribute { size_bits, inner }
            }
        }
        Some(b'-') => {
            let type_id = cursor
                .eat_s64_literal()
                .ok_or(Error::CannotParse("built-in"))?;
            cursor.expect_char(b';', "builtin")?;
            StabsTypeBody::BuiltIn { type_id }
        }
        Some(c) => return Err(Error::InvalidTypeDescriptor(c as char)),
    };

    // Cross references carry their own name.
    let name = match &body {
        StabsTypeBody::CrossReference { identifier, .. } => Some(identifier.clone()),
        _ => None,
    };

    Ok(Box::new(StabsType {
        number,
        name,
        is_typedef: false,
        is_root: false,
        body: Some(body),
    }))
}

fn parse_field_list(cursor: &mut Cursor) -> Result<Vec<StabsField>> {
    let mut fields = Vec::new();

    loop {
        match cursor.peek() {
            None => break,
            Some(b';') => {
                cursor.advance();
                break;
            }
            Some(_) => {}
        }

        let before_field = cursor.pos;

        let name = cursor.eat_dodgy_stabs_identifier()?;
        cursor.expect_char(b':', "identifier")?;

        let mut visibility = StabsFieldVisibility::None;
        if cursor.peek() == Some(b'/') {
            cursor.advance();
            let visibility_char = cursor
                .eat_char()
                .ok_or(Error::UnexpectedEof("field visibility"))?;
            visibility = StabsFieldVisibility::from_char(visibility_char)
                .ok_or(Error::InvalidFieldVisibility(visibility_char as char))?;
        }

        // A second colon here means this is a member function entry from an
        // enclosing list, so back out.
        if cursor.peek() == Some(b':') {
            cursor.pos = before_field;
            break;
        }

        let ty = parse_stabs_type(cursor)?;

        let mut field = StabsField {
            name,
            visibility,
            ty,
            is_static: false,
            offset_bits: 0,
            size_bits: 0,
            type_name: None,
        };

        if field.name.starts_with('$') {
            // Virtual table pointers.
            cursor.expect_char(b',', "field type")?;
            field.offset_bits = cursor
                .eat_s32_literal()
                .ok_or(Error::CannotParse("field offset"))?;
            cursor.expect_char(b';', "field offset")?;
        } else if cursor.peek() == Some(b':') {
            cursor.advance();
            field.is_static = true;
            field.type_name = Some(cursor.eat_dodgy_stabs_identifier()?);
            cursor.expect_char(b';', "identifier")?;
        } else if cursor.peek() == Some(b',') {
            cursor.advance();
            field.offset_bits = cursor
                .eat_s32_literal()
                .ok_or(Error::CannotParse("field offset"))?;
            cursor.expect_char(b',', "field offset")?;
            field.size_bits = cursor
                .eat_s32_literal()
                .ok_or(Error::CannotParse("field size"))?;
            cursor.expect_char(b';', "field size")?;
        } else {
            return Err(match cursor.peek() {
                Some(c) => Error::ExpectedChar {
                    expected: ',',
                    got: c as char,
                    subject: "field terminator",
                },
                None => Error::UnexpectedEof("field terminator"),
            });
        }

        fields.push(field);
    }

    Ok(fields)
}

fn parse_member_functions(cursor: &mut Cursor) -> Result<Vec<StabsMemberFunctionSet>> {
    // Check if the next character is from an enclosing field list. If this
    // is the case, the next character will be ',' for normal fields and ':'
    // for static fields.
    if let Some(b',' | b':') = cursor.peek() {
        return Ok(Vec::new());
    }

    let mut member_functions = Vec::new();
    loop {
        match cursor.peek() {
            None => break,
            Some(b';') => {
                cursor.advance();
                break;
            }
            Some(_) => {}
        }

        let name = cursor.eat_stabs_identifier()?;
        cursor.expect_char(b':', "member function")?;
        cursor.expect_char(b':', "member function")?;

        let mut overloads = Vec::new();
        loop {
            match cursor.peek() {
                None => break,
                Some(b';') => {
                    cursor.advance();
                    break;
                }
                Some(_) => {}
            }

            let ty = parse_stabs_type(cursor)?;

            cursor.expect_char(b':', "member function")?;
            cursor.eat_dodgy_stabs_identifier()?;
            cursor.expect_char(b';', "member function")?;

            let visibility_char = cursor
                .eat_char()
                .ok_or(Error::UnexpectedEof("member function visibility"))?;
            let visibility = StabsFieldVisibility::from_char(visibility_char)
                .filter(|visibility| *visibility != StabsFieldVisibility::None)
                .ok_or(Error::InvalidFieldVisibility(visibility_char as char))?;

            let modifiers = cursor
                .eat_char()
                .ok_or(Error::UnexpectedEof("member function modifiers"))?;
            let (is_const, is_volatile) = match modifiers {
                b'A' => (false, false),
                b'B' => (true, false),
                b'C' => (false, true),
                b'D' => (true, true),
                b'?' | b'.' => (false, false),
                c => return Err(Error::InvalidMemberFunctionModifiers(c as char)),
            };

            let flag = cursor
                .eat_char()
                .ok_or(Error::UnexpectedEof("member function type"))?;
            let mut function = StabsMemberFunction {
                ty,
                visibility,
                is_const,
                is_volatile,
                modifier: MemberFunctionModifier::None,
                vtable_index: None,
                virtual_type: None,
            };
            match flag {
                b'.' => {
                    function.modifier = MemberFunctionModifier::None;
                }
                b'?' => {
                    function.modifier = MemberFunctionModifier::Static;
                }
                b'*' => {
                    function.vtable_index = Some(
                        cursor
                            .eat_s32_literal()
                            .ok_or(Error::CannotParse("vtable index"))?,
                    );
                    cursor.expect_char(b';', "virtual member function")?;
                    function.virtual_type = Some(parse_stabs_type(cursor)?);
                    cursor.expect_char(b';', "virtual member function")?;
                    function.modifier = MemberFunctionModifier::Virtual;
                }
                c => return Err(Error::InvalidMemberFunctionType(c as char)),
            }
            overloads.push(function);
        }

        member_functions.push(StabsMemberFunctionSet { name, overloads });
    }

    Ok(member_functions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> StabsSymbol {
        parse_stabs_symbol(input).expect("failed to parse stab")
    }

    // ee-g++ -gstabs
    // typedef int s32;
    #[test]
    fn type_number() {
        let symbol = parse("s32:t1=0");
        assert_eq!(Some(TypeNum::single(1)), symbol.ty.number);
        assert!(symbol.ty.has_body());
        assert!(symbol.ty.is_typedef);
    }

    // ee-g++ -gstabs
    // typedef int s32;
    #[test]
    fn fancy_type_number() {
        let symbol = parse("s32:t(1,1)=(0,1)");
        assert_eq!(Some(TypeNum { file: 1, index: 1 }), symbol.ty.number);
        let Some(StabsTypeBody::TypeReference(inner)) = &symbol.ty.body else {
            panic!("expected a type reference");
        };
        assert_eq!(Some(TypeNum { file: 0, index: 1 }), inner.number);
        assert!(!inner.has_body());
    }

    // ee-g++ -gstabs
    // typedef int Array[1][2];
    #[test]
    fn multi_dimensional_array() {
        let symbol =
            parse("Array:t(1,1)=(1,2)=ar(1,3)=r(1,3);0;4294967295;;0;0;(1,4)=ar(1,3);0;1;(1,5)=ar(1,3);0;2;(0,1)");
        let Some(StabsTypeBody::TypeReference(inner)) = &symbol.ty.body else {
            panic!("expected a type reference");
        };
        let Some(StabsTypeBody::Array {
            index_type,
            element_type,
        }) = &inner.body
        else {
            panic!("expected an array");
        };
        let Some(StabsTypeBody::Range { high, .. }) = &index_type.body else {
            panic!("expected a range");
        };
        assert_eq!("0", high);
        let Some(StabsTypeBody::Array { index_type, .. }) = &element_type.body else {
            panic!("expected an inner array");
        };
        let Some(StabsTypeBody::Range { high, .. }) = &index_type.body else {
            panic!("expected a range");
        };
        assert_eq!("1", high);
    }

    // ee-g++ -gstabs
    // enum E { A = 0, B = 1, C = 2147483647, D = -2147483648 };
    #[test]
    fn enum_constants() {
        let symbol = parse("E:t(1,1)=eA:0,B:1,C:2147483647,D:-2147483648,;");
        let Some(StabsTypeBody::Enum { constants }) = &symbol.ty.body else {
            panic!("expected an enum");
        };
        assert_eq!(
            &[
                (0, "A".to_string()),
                (1, "B".to_string()),
                (2147483647, "C".to_string()),
                (-2147483648, "D".to_string()),
            ],
            constants.as_slice()
        );
    }

    // ee-g++ -gstabs
    // int
    #[test]
    fn range_built_in() {
        let symbol = parse("int:t(0,1)=r(0,1);-2147483648;2147483647;");
        let Some(StabsTypeBody::Range { low, high, .. }) = &symbol.ty.body else {
            panic!("expected a range");
        };
        assert_eq!("-2147483648", low);
        assert_eq!("2147483647", high);
    }

    // -gstabs+
    // typedef volatile int VolatileInt;
    #[test]
    fn volatile_qualifier() {
        let symbol = parse("VolatileInt:t(1,1)=(1,2)=B(0,1)");
        let Some(StabsTypeBody::TypeReference(inner)) = &symbol.ty.body else {
            panic!("expected a type reference");
        };
        assert!(matches!(
            inner.body,
            Some(StabsTypeBody::VolatileQualifier(_))
        ));
    }

    // -gstabs+
    // typedef const int ConstInt;
    #[test]
    fn const_qualifier() {
        let symbol = parse("ConstInt:t(1,1)=(1,2)=k(0,1)");
        let Some(StabsTypeBody::TypeReference(inner)) = &symbol.ty.body else {
            panic!("expected a type reference");
        };
        assert!(matches!(inner.body, Some(StabsTypeBody::ConstQualifier(_))));
    }

    // ee-g++ -gstabs
    // struct SimpleStruct { int a; };
    #[test]
    fn simple_struct() {
        let symbol = parse("SimpleStruct:T(1,1)=s4a:(0,1),0,32;;");
        assert_eq!(Some("SimpleStruct".to_string()), symbol.ty.name);
        assert!(!symbol.ty.is_typedef);
        let Some(StabsTypeBody::Struct { size, fields, .. }) = &symbol.ty.body else {
            panic!("expected a struct");
        };
        assert_eq!(4, *size);
        assert_eq!(1, fields.len());
        assert_eq!("a", fields[0].name);
        assert_eq!(0, fields[0].offset_bits);
        assert_eq!(32, fields[0].size_bits);
    }

    // ee-g++ -gstabs
    // struct Vtable { virtual void f(); };
    #[test]
    fn struct_with_member_function() {
        let symbol = parse(
            "Vtable:Tt(1,1)=s4$vf(1,1):(1,2)=*(1,3)=(1,3),0;f::(1,4)=##(0,1);:_ZN6Vtable1fEv;2A*0;(1,5)=*(1,1);;;~%(1,1);",
        );
        let Some(StabsTypeBody::Struct {
            fields,
            member_functions,
            first_base_class,
            ..
        }) = &symbol.ty.body
        else {
            panic!("expected a struct");
        };
        assert_eq!(1, fields.len());
        assert!(fields[0].name.starts_with('$'));
        assert_eq!(1, member_functions.len());
        assert_eq!("f", member_functions[0].name);
        let overload = &member_functions[0].overloads[0];
        assert_eq!(MemberFunctionModifier::Virtual, overload.modifier);
        assert_eq!(Some(0), overload.vtable_index);
        assert!(first_base_class.is_some());
    }

    // ee-g++ -gstabs
    // namespaced identifiers survive the unescaped "::".
    #[test]
    fn dodgy_identifiers() {
        let mut cursor = Cursor::new("NamespaceA::B:");
        assert_eq!(
            "NamespaceA::B",
            cursor.eat_dodgy_stabs_identifier().unwrap()
        );

        let mut cursor = Cursor::new("Template<int, Namespace::Nested>:");
        assert_eq!(
            "Template<int, Namespace::Nested>",
            cursor.eat_dodgy_stabs_identifier().unwrap()
        );
    }

    #[test]
    fn static_field() {
        let symbol = parse("WithStatic:T(1,1)=s4count:/2(0,1):_ZN10WithStatic5countE;;");
        let Some(StabsTypeBody::Struct { fields, .. }) = &symbol.ty.body else {
            panic!("expected a struct");
        };
        assert_eq!(1, fields.len());
        assert!(fields[0].is_static);
        assert_eq!(StabsFieldVisibility::Public, fields[0].visibility);
        assert_eq!(
            Some("_ZN10WithStatic5countE".to_string()),
            fields[0].type_name
        );
    }

    #[test]
    fn cross_reference() {
        let symbol = parse("Opaque:t(1,1)=(1,2)=xsOpaque:");
        let Some(StabsTypeBody::TypeReference(inner)) = &symbol.ty.body else {
            panic!("expected a type reference");
        };
        let Some(StabsTypeBody::CrossReference { kind, identifier }) = &inner.body else {
            panic!("expected a cross reference");
        };
        assert_eq!(ForwardDeclaredKind::Struct, *kind);
        assert_eq!("Opaque", identifier);
    }

    #[test]
    fn error_messages_name_the_subject() {
        let error = parse_stabs_symbol("E:t(1,1)=eA:0:B:1,;").expect_err("should fail");
        assert!(matches!(error, Error::ExpectedChar { subject: "enum", .. }));
    }

    #[test]
    fn enumerate_numbered_types_keeps_first() {
        let symbol = parse("s32:t(1,1)=(1,2)=ar(1,3)=r(1,3);0;1;;0;0;(0,1)");
        let mut numbered = BTreeMap::new();
        symbol.ty.enumerate_numbered_types(&mut numbered);
        assert!(numbered.contains_key(&TypeNum { file: 1, index: 1 }));
        assert!(numbered.contains_key(&TypeNum { file: 1, index: 2 }));
        assert!(numbered.contains_key(&TypeNum { file: 1, index: 3 }));
        assert!(!numbered.contains_key(&TypeNum { file: 0, index: 1 }));
    }
}
