//! Code generation for the `register_block!` macro.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::parse::{RegisterBlock, RegisterDef};

/// Generates the struct and impl for a register block.
pub fn generate(block: &RegisterBlock) -> TokenStream {
    let vis = &block.vis;
    let name = &block.name;
    let attrs = &block.attrs;
    let span = block.span();

    let methods = block.registers.iter().map(|reg| {
        let read = reg.access.readable().then(|| generate_read(reg));
        let write = reg.access.writable().then(|| generate_write(reg));
        quote! { #read #write }
    });

    quote! {
        #(#attrs)*
        #[derive(Debug, Clone, Copy)]
        #vis struct #name {
            base: usize,
        }

        impl #name {
            /// Bytes a window must cover to hold every register of this block.
            #vis const SPAN: u64 = #span;

            /// Binds the block to a mapped window.
            ///
            /// Returns `None` if the window is smaller than [`Self::SPAN`].
            ///
            /// # Safety
            ///
            /// `region` must stay mapped for as long as the returned block
            /// (or any copy of it) is used.
            #[must_use]
            #vis unsafe fn new(region: &::muon_mmio::MmioRegion) -> Option<Self> {
                if region.size() < Self::SPAN {
                    return None;
                }
                Some(Self { base: region.virt_base() })
            }

            /// Returns the virtual base address of the bound window.
            #[must_use]
            #vis fn base(&self) -> usize {
                self.base
            }

            #(#methods)*
        }
    }
}

fn generate_read(reg: &RegisterDef) -> TokenStream {
    let name = &reg.name;
    let offset = reg.offset as usize;
    let width_ty = width_type(reg);
    let attrs = &reg.attrs;

    let raw = quote! {
        // SAFETY: `new` checked the window covers this register and its caller
        // guarantees the window stays mapped.
        unsafe { core::ptr::read_volatile((self.base + #offset) as *const #width_ty) }
    };

    match reg.bitflags_type {
        Some(ref bf_type) => quote! {
            #(#attrs)*
            #[inline]
            pub fn #name(&self) -> #bf_type {
                #bf_type::from_bits_retain(#raw)
            }
        },
        None => quote! {
            #(#attrs)*
            #[inline]
            pub fn #name(&self) -> #width_ty {
                #raw
            }
        },
    }
}

fn generate_write(reg: &RegisterDef) -> TokenStream {
    let setter_name = format_ident!("set_{}", reg.name);
    let offset = reg.offset as usize;
    let width_ty = width_type(reg);
    let set_doc = format!("Writes the `{}` register.", reg.name);

    let (value_ty, raw_value) = match reg.bitflags_type {
        Some(ref bf_type) => (quote! { #bf_type }, quote! { value.bits() }),
        None => (quote! { #width_ty }, quote! { value }),
    };

    quote! {
        #[doc = #set_doc]
        #[inline]
        pub fn #setter_name(&self, value: #value_ty) {
            // SAFETY: see the matching read accessor.
            unsafe {
                core::ptr::write_volatile((self.base + #offset) as *mut #width_ty, #raw_value);
            }
        }
    }
}

fn width_type(reg: &RegisterDef) -> TokenStream {
    let ident = format_ident!("{}", reg.width.type_name());
    quote! { #ident }
}
