use std::collections::BTreeMap;

use crate::flags::ImporterFlags;
use crate::mdebug;
use crate::mdebug::stabs_code_to_string;
use crate::mdebug::StabsCode;
use crate::stabs::parse_stabs_symbol;
use crate::stabs::StabsSymbol;
use crate::stabs::StabsSymbolDescriptor;
use crate::stabs::StabsTypeBody;
use crate::stabs::TypeNum;
use crate::Error;
use crate::Result;

/// A symbol record categorized by its role in the per-file stream.
#[derive(Debug)]
pub struct ParsedSymbol {
    /// Index of the backing record in the file's symbol list.
    pub raw: usize,
    pub kind: ParsedSymbolKind,
    /// Compilers sometimes generate two stabs for one type; redundant ones
    /// are marked and skipped.
    pub duplicate: bool,
}

#[derive(Debug)]
pub enum ParsedSymbolKind {
    NameColonType {
        symbol: StabsSymbol,
        /// Set when a redundant self-typedef promoted this definition to a
        /// typedef.
        promoted_to_typedef: bool,
    },
    SourceFile,
    SubSourceFile,
    BlockBegin,
    BlockEnd,
    FunctionEnd,
    NonStabs,
}

/// Parse the stab strings of one translation unit into a stream of
/// categorized records.
pub fn parse_symbols(
    input: &[mdebug::Symbol],
    flags: ImporterFlags,
) -> Result<Vec<ParsedSymbol>> {
    let mut output = Vec::new();
    let mut prefix = String::new();

    for (raw, symbol) in input.iter().enumerate() {
        let Some(code) = symbol.stab_code else {
            output.push(ParsedSymbol {
                raw,
                kind: ParsedSymbolKind::NonStabs,
                duplicate: false,
            });
            continue;
        };
        match code {
            StabsCode::Gsym
            | StabsCode::Fun
            | StabsCode::Stsym
            | StabsCode::Lcsym
            | StabsCode::Rsym
            | StabsCode::Lsym
            | StabsCode::Psym => {
                if !symbol.string.is_empty() {
                    // Some STABS symbols are split between multiple strings.
                    if let Some(stripped) = symbol.string.strip_suffix('\\') {
                        prefix.push_str(stripped);
                    } else {
                        let combined = if prefix.is_empty() {
                            symbol.string.clone()
                        } else {
                            core::mem::take(&mut prefix) + &symbol.string
                        };
                        let stabs_symbol = parse_stabs_symbol(&combined)?;
                        output.push(ParsedSymbol {
                            raw,
                            kind: ParsedSymbolKind::NameColonType {
                                symbol: stabs_symbol,
                                promoted_to_typedef: false,
                            },
                            duplicate: false,
                        });
                    }
                } else {
                    if !prefix.is_empty() {
                        return Err(Error::InvalidStabsContinuation);
                    }
                    // An empty N_FUN closes the preceding function.
                    if code == StabsCode::Fun {
                        output.push(ParsedSymbol {
                            raw,
                            kind: ParsedSymbolKind::FunctionEnd,
                            duplicate: false,
                        });
                    }
                }
            }
            StabsCode::Sol => output.push(ParsedSymbol {
                raw,
                kind: ParsedSymbolKind::SubSourceFile,
                duplicate: false,
            }),
            StabsCode::So => output.push(ParsedSymbol {
                raw,
                kind: ParsedSymbolKind::SourceFile,
                duplicate: false,
            }),
            StabsCode::Lbrac => output.push(ParsedSymbol {
                raw,
                kind: ParsedSymbolKind::BlockBegin,
                duplicate: false,
            }),
            StabsCode::Rbrac => output.push(ParsedSymbol {
                raw,
                kind: ParsedSymbolKind::BlockEnd,
                duplicate: false,
            }),
            StabsCode::Stab | StabsCode::Opt | StabsCode::Bincl => {}
            _ => {
                if flags.contains(ImporterFlags::STRICT_PARSING) {
                    return Err(Error::UnhandledStabsSymbol(
                        stabs_code_to_string(code),
                        symbol.string.clone(),
                    ));
                }
                log::warn!(
                    "Unhandled N_{} symbol: {}",
                    stabs_code_to_string(code),
                    symbol.string
                );
            }
        }
    }

    mark_duplicate_types(&mut output);

    Ok(output)
}

/// Compilers emit multiple stabs for some type declarations: an unnamed
/// definition referenced by a named typedef, a tag immediately followed by a
/// redundant self-typedef, or both. Mark the redundant records so only one
/// data type is created, and remember when a surviving tag should be treated
/// as a typedef.
fn mark_duplicate_types(symbols: &mut [ParsedSymbol]) {
    let (duplicates, promotions) = find_duplicate_types(symbols);
    for index in duplicates {
        symbols[index].duplicate = true;
    }
    for index in promotions {
        if let ParsedSymbolKind::NameColonType {
            promoted_to_typedef,
            ..
        } = &mut symbols[index].kind
        {
            *promoted_to_typedef = true;
        }
    }
}

fn find_duplicate_types(symbols: &[ParsedSymbol]) -> (Vec<usize>, Vec<usize>) {
    // Collect which record defines each type number.
    let mut definitions: BTreeMap<TypeNum, usize> = BTreeMap::new();
    for (index, parsed) in symbols.iter().enumerate() {
        let ParsedSymbolKind::NameColonType { symbol, .. } = &parsed.kind else {
            continue;
        };
        if !is_type_symbol(symbol) {
            continue;
        }
        if let (Some(number), true) = (symbol.ty.number, symbol.ty.has_body()) {
            definitions.entry(number).or_insert(index);
        }
    }

    let mut duplicates = Vec::new();
    let mut promotions = Vec::new();

    for (index, parsed) in symbols.iter().enumerate() {
        let ParsedSymbolKind::NameColonType { symbol, .. } = &parsed.kind else {
            continue;
        };
        if symbol.descriptor != StabsSymbolDescriptor::TypeName {
            continue;
        }
        match &symbol.ty.body {
            // e.g. "Struct:T(1,1)=s1;" followed by "Struct:t(1,1)".
            None => {
                let Some(number) = symbol.ty.number else {
                    continue;
                };
                if let Some(&definition) = definitions.get(&number) {
                    if definition != index && symbol_name(symbols, definition) == Some(&symbol.name)
                    {
                        duplicates.push(index);
                    }
                }
            }
            // e.g. "Enum:t(1,1)=e;" followed by "Enum:t(1,2)=(1,1)".
            Some(StabsTypeBody::TypeReference(inner)) if !inner.has_body() => {
                let Some(inner_number) = inner.number else {
                    continue;
                };
                let Some(&definition) = definitions.get(&inner_number) else {
                    continue;
                };
                if definition == index {
                    continue;
                }
                match symbol_name(symbols, definition) {
                    Some(name) if name == &symbol.name => {
                        // A typedef with the same name as the definition
                        // means the original declaration was a typedef.
                        duplicates.push(index);
                        promotions.push(definition);
                    }
                    Some(name) if name.trim().is_empty() => {
                        // The definition is unnamed and only reachable
                        // through this typedef, so let the typedef win.
                        duplicates.push(definition);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    (duplicates, promotions)
}

fn is_type_symbol(symbol: &StabsSymbol) -> bool {
    matches!(
        symbol.descriptor,
        StabsSymbolDescriptor::TypeName | StabsSymbolDescriptor::EnumStructOrTypeTag
    )
}

fn symbol_name(symbols: &[ParsedSymbol], index: usize) -> Option<&String> {
    match &symbols[index].kind {
        ParsedSymbolKind::NameColonType { symbol, .. } => Some(&symbol.name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mdebug::Symbol;
    use crate::mdebug::SymbolClass;
    use crate::mdebug::SymbolType;

    fn lsym(string: &str) -> Symbol {
        Symbol::stabs(StabsCode::Lsym, SymbolType::Nil, SymbolClass::Nil, 0, string)
    }

    #[test]
    fn continuation_lines_are_glued() {
        let input = [lsym("LongStruct:T(1,1)=s8a:(0,1),0,\\"), lsym("32;b:(0,1),32,32;;")];
        let parsed = parse_symbols(&input, ImporterFlags::STRICT_PARSING).expect("parse");
        assert_eq!(1, parsed.len());
        let ParsedSymbolKind::NameColonType { symbol, .. } = &parsed[0].kind else {
            panic!("expected a name:type symbol");
        };
        assert_eq!("LongStruct", symbol.name);
    }

    #[test]
    fn dangling_continuation_is_an_error() {
        let input = [lsym("LongStruct:T(1,1)=s8a:(0,1),0,\\"), lsym("")];
        assert!(matches!(
            parse_symbols(&input, ImporterFlags::empty()),
            Err(Error::InvalidStabsContinuation)
        ));
    }

    #[test]
    fn empty_fun_marks_the_end_of_a_function() {
        let input = [Symbol::stabs(
            StabsCode::Fun,
            SymbolType::Nil,
            SymbolClass::Text,
            0,
            "",
        )];
        let parsed = parse_symbols(&input, ImporterFlags::STRICT_PARSING).expect("parse");
        assert_eq!(1, parsed.len());
        assert!(matches!(parsed[0].kind, ParsedSymbolKind::FunctionEnd));
    }

    #[test]
    fn unknown_codes_fail_in_strict_mode() {
        let input = [Symbol::stabs(
            StabsCode::Main,
            SymbolType::Nil,
            SymbolClass::Nil,
            0,
            "main",
        )];
        assert!(parse_symbols(&input, ImporterFlags::empty()).is_ok());
        assert!(matches!(
            parse_symbols(&input, ImporterFlags::STRICT_PARSING),
            Err(Error::UnhandledStabsSymbol("MAIN", _))
        ));
    }

    #[test]
    fn redundant_self_typedef_is_marked_duplicate() {
        let input = [lsym("Struct:T(1,1)=s1;"), lsym("Struct:t(1,1)")];
        let parsed = parse_symbols(&input, ImporterFlags::STRICT_PARSING).expect("parse");
        assert!(!parsed[0].duplicate);
        assert!(parsed[1].duplicate);
    }

    #[test]
    fn typedef_of_a_tag_with_the_same_name_promotes_it() {
        let input = [lsym("Enum:t(1,1)=e;"), lsym("Enum:t(1,2)=(1,1)")];
        let parsed = parse_symbols(&input, ImporterFlags::STRICT_PARSING).expect("parse");
        let ParsedSymbolKind::NameColonType {
            promoted_to_typedef,
            ..
        } = &parsed[0].kind
        else {
            panic!("expected a name:type symbol");
        };
        assert!(*promoted_to_typedef);
        assert!(parsed[1].duplicate);
    }

    #[test]
    fn typedef_of_an_unnamed_type_wins() {
        let input = [lsym(" :T(1,1)=e;"), lsym("ErraticEnum:t(1,2)=(1,1)")];
        let parsed = parse_symbols(&input, ImporterFlags::STRICT_PARSING).expect("parse");
        assert!(parsed[0].duplicate);
        assert!(!parsed[1].duplicate);
    }
}
