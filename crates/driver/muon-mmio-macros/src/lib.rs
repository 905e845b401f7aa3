//! Proc-macro crate for the `register_block!` MMIO register DSL.
//!
//! Generates a typed accessor struct over a mapped register window. The
//! struct is built from a `muon_mmio::MmioRegion` and refuses windows that do
//! not cover every declared register; after that single `unsafe` construction
//! point, all generated reads and writes are safe.

mod codegen;
mod parse;

use proc_macro::TokenStream;
use syn::parse_macro_input;

use crate::parse::RegisterBlock;

/// Generates a typed MMIO register block struct with safe accessors.
///
/// # Syntax
///
/// ```ignore
/// register_block! {
///     /// Doc comment for the struct.
///     pub StructName {
///         /// Doc comment for the register.
///         [offset; width; access_mode] name => OptionalBitflagsType,
///     }
/// }
/// ```
///
/// - `offset` — byte offset from the window base, naturally aligned to `width`
/// - `width` — `u8`, `u16`, `u32`, or `u64`
/// - `access_mode` — `ro`, `wo`, or `rw`
/// - `=> Type` — optional bitflags type (`from_bits_retain` / `bits()`)
///
/// # Generated Code
///
/// - `const SPAN: u64` — bytes the window must cover
/// - `unsafe fn new(region: &MmioRegion) -> Option<Self>`
/// - `ro`/`rw`: `fn name(&self) -> Type`
/// - `wo`/`rw`: `fn set_name(&self, value: Type)`
///
/// # Example
///
/// ```ignore
/// use muon_mmio::register_block;
///
/// register_block! {
///     /// Status window of the edu device.
///     pub StatusRegs {
///         /// Live status word.
///         [0x00; u32; ro] status,
///     }
/// }
/// ```
#[proc_macro]
pub fn register_block(input: TokenStream) -> TokenStream {
    let block = parse_macro_input!(input as RegisterBlock);
    codegen::generate(&block).into()
}
