//! Parsing for the `register_block!` DSL.

use syn::parse::{Parse, ParseStream};
use syn::{Attribute, Ident, LitInt, Token, Visibility, braced, bracketed};

/// A complete register block definition.
pub struct RegisterBlock {
    /// Attributes (usually docs) on the struct.
    pub attrs: Vec<Attribute>,
    /// Visibility of the generated struct.
    pub vis: Visibility,
    /// Name of the generated struct.
    pub name: Ident,
    /// Register definitions, in declaration order.
    pub registers: Vec<RegisterDef>,
}

impl RegisterBlock {
    /// Number of bytes a window must cover to hold every register.
    pub fn span(&self) -> u64 {
        self.registers
            .iter()
            .map(|reg| reg.offset + reg.width.bytes())
            .max()
            .unwrap_or(0)
    }
}

/// Access mode for a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn readable(self) -> bool {
        self != Self::WriteOnly
    }

    pub fn writable(self) -> bool {
        self != Self::ReadOnly
    }
}

/// Width of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegWidth {
    U8,
    U16,
    U32,
    U64,
}

impl RegWidth {
    fn from_ident(ident: &Ident) -> syn::Result<Self> {
        match ident.to_string().as_str() {
            "u8" => Ok(Self::U8),
            "u16" => Ok(Self::U16),
            "u32" => Ok(Self::U32),
            "u64" => Ok(Self::U64),
            _ => Err(syn::Error::new(
                ident.span(),
                "expected register width: u8, u16, u32, or u64",
            )),
        }
    }

    /// Returns the Rust type name for this width.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
        }
    }

    /// Returns the access size in bytes.
    pub fn bytes(self) -> u64 {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }
}

/// A single register definition.
pub struct RegisterDef {
    pub attrs: Vec<Attribute>,
    /// Byte offset from the window base.
    pub offset: u64,
    pub width: RegWidth,
    pub access: AccessMode,
    /// Register name; readers use it verbatim, writers get a `set_` prefix.
    pub name: Ident,
    /// Optional bitflags type wrapping the raw value.
    pub bitflags_type: Option<Ident>,
}

impl Parse for RegisterBlock {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let attrs = input.call(Attribute::parse_outer)?;
        let vis: Visibility = input.parse()?;
        let name: Ident = input.parse()?;

        let content;
        braced!(content in input);

        let mut registers: Vec<RegisterDef> = Vec::new();
        while !content.is_empty() {
            let reg = content.call(parse_register)?;
            if registers.iter().any(|r| r.name == reg.name) {
                return Err(syn::Error::new(
                    reg.name.span(),
                    "register name declared twice",
                ));
            }
            registers.push(reg);
        }

        Ok(Self {
            attrs,
            vis,
            name,
            registers,
        })
    }
}

/// Parses one `[offset; width; access] name => Type,` line.
fn parse_register(input: ParseStream) -> syn::Result<RegisterDef> {
    let attrs = input.call(Attribute::parse_outer)?;

    let bracket_content;
    bracketed!(bracket_content in input);

    let offset_lit: LitInt = bracket_content.parse()?;
    let offset: u64 = offset_lit.base10_parse()?;
    bracket_content.parse::<Token![;]>()?;

    let width = RegWidth::from_ident(&bracket_content.parse()?)?;
    if offset % width.bytes() != 0 {
        return Err(syn::Error::new(
            offset_lit.span(),
            format!(
                "offset {offset:#x} is not aligned to a {}-byte register",
                width.bytes()
            ),
        ));
    }
    bracket_content.parse::<Token![;]>()?;

    let access_ident: Ident = bracket_content.parse()?;
    let access = match access_ident.to_string().as_str() {
        "ro" => AccessMode::ReadOnly,
        "wo" => AccessMode::WriteOnly,
        "rw" => AccessMode::ReadWrite,
        _ => {
            return Err(syn::Error::new(
                access_ident.span(),
                "expected access mode: ro, wo, or rw",
            ));
        }
    };

    let name: Ident = input.parse()?;

    let bitflags_type = if input.peek(Token![=>]) {
        input.parse::<Token![=>]>()?;
        Some(input.parse::<Ident>()?)
    } else {
        None
    };

    if !input.is_empty() {
        input.parse::<Token![,]>()?;
    }

    Ok(RegisterDef {
        attrs,
        offset,
        width,
        access,
        name,
        bitflags_type,
    })
}
