use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, Result as SynResult, Type};

/// Reads `#[response(Type)]`. Absent means `()`.
fn response_type(input: &DeriveInput) -> SynResult<Type> {
    let mut found: Option<Type> = None;
    for attr in &input.attrs {
        if !attr.path().is_ident("response") {
            continue;
        }
        if found.is_some() {
            return Err(syn::Error::new_spanned(
                attr,
                "#[response(...)] may only be given once",
            ));
        }
        found = Some(attr.parse_args::<Type>()?);
    }
    Ok(found.unwrap_or_else(|| syn::parse_quote!(())))
}

fn expand_request(input: &DeriveInput, kind: &str) -> SynResult<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let response = response_type(input)?;
    let (variant, marker) = match kind {
        "command" => (quote!(Command), quote!(::brrtmediator::Command)),
        _ => (quote!(Query), quote!(::brrtmediator::Query)),
    };

    Ok(quote! {
        impl #impl_generics ::brrtmediator::Request for #name #ty_generics #where_clause {
            type Response = #response;
            const KIND: ::brrtmediator::RequestKind = ::brrtmediator::RequestKind::#variant;
        }

        impl #impl_generics #marker for #name #ty_generics #where_clause {}
    })
}

/// Implements `Request` (kind `Command`) and `Command`.
///
/// ```ignore
/// #[derive(Command)]
/// #[response(u64)]
/// struct CreateOrder { sku: String }
/// ```
#[proc_macro_derive(Command, attributes(response))]
pub fn derive_command(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    expand_request(&input, "command")
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Implements `Request` (kind `Query`) and `Query`.
#[proc_macro_derive(Query, attributes(response))]
pub fn derive_query(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    expand_request(&input, "query")
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Implements `Event`.
#[proc_macro_derive(Event)]
pub fn derive_event(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let expanded = quote! {
        impl #impl_generics ::brrtmediator::Event for #name #ty_generics #where_clause {}
    };
    TokenStream::from(expanded)
}
