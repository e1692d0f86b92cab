use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Type};

// Derive for partial-update payloads whose members are all Options.
// Generates patched_fields() returning the names of the members that are Some,
// and is_empty_patch() for the nothing-to-do case.
#[proc_macro_derive(PatchFields)]
pub fn patch_fields(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let struct_name = input.ident;

    let named = match input.data {
        Data::Struct(data) => match data.fields {
            Fields::Named(fields) => fields.named,
            other => {
                return syn::Error::new_spanned(other, "PatchFields requires named struct fields")
                    .to_compile_error()
                    .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(&struct_name, "PatchFields can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let checks = named.iter().filter_map(|field| {
        let name = field.ident.as_ref()?;
        let Type::Path(type_path) = &field.ty else {
            return None;
        };
        if type_path.path.segments.first()?.ident != "Option" {
            return None;
        }
        Some(quote! {
            if self.#name.is_some() {
                patched.push(stringify!(#name));
            }
        })
    });

    let expanded = quote! {
        impl #struct_name {
            pub fn patched_fields(&self) -> Vec<&'static str> {
                let mut patched = Vec::new();
                #(#checks)*
                patched
            }
            pub fn is_empty_patch(&self) -> bool {
                self.patched_fields().is_empty()
            }
        }
    };
    TokenStream::from(expanded)
}
