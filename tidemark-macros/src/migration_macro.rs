use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Error, FnArg, ItemFn, LitInt, LitStr, Meta, Result, Token};

pub struct MigrationArgs {
    sequence: Option<LitInt>,
    name: Option<LitStr>,
}

impl Parse for MigrationArgs {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut args = MigrationArgs {
            sequence: None,
            name: None,
        };

        let metas = Punctuated::<Meta, Token![,]>::parse_terminated(input)?;
        for meta in metas {
            let Meta::NameValue(pair) = &meta else {
                return Err(Error::new(meta.span(), "expected `sequence = <int>` or `name = \"...\"`"));
            };
            let key = pair
                .path
                .get_ident()
                .map(ToString::to_string)
                .unwrap_or_default();
            let syn::Expr::Lit(syn::ExprLit { lit, .. }) = &pair.value else {
                return Err(Error::new(pair.value.span(), "expected a literal"));
            };

            match (key.as_str(), lit) {
                ("sequence", syn::Lit::Int(value)) => {
                    if args.sequence.replace(value.clone()).is_some() {
                        return Err(Error::new(pair.path.span(), "duplicate `sequence`"));
                    }
                }
                ("name", syn::Lit::Str(value)) => {
                    if args.name.replace(value.clone()).is_some() {
                        return Err(Error::new(pair.path.span(), "duplicate `name`"));
                    }
                }
                ("sequence", other) => return Err(Error::new(other.span(), "`sequence` must be an integer")),
                ("name", other) => return Err(Error::new(other.span(), "`name` must be a string literal")),
                (other, _) => {
                    return Err(Error::new(pair.path.span(), format!("unknown migration attribute `{other}`")));
                }
            }
        }

        Ok(args)
    }
}

pub fn emit(args: MigrationArgs, function: ItemFn) -> Result<TokenStream2> {
    let Some(sequence) = args.sequence else {
        return Err(Error::new(Span::call_site(), "missing `sequence = <int>`"));
    };
    let sequence_value: u64 = sequence.base10_parse()?;

    let signature = &function.sig;
    if signature.asyncness.is_none() {
        return Err(Error::new(signature.fn_token.span(), "migration functions must be `async`"));
    }
    if signature.inputs.len() != 1 {
        return Err(Error::new(
            signature.inputs.span(),
            "migration functions take exactly one argument: `ctx: MigrationContext`",
        ));
    }
    if let Some(FnArg::Receiver(receiver)) = signature.inputs.first() {
        return Err(Error::new(receiver.span(), "migration functions cannot take `self`"));
    }
    if !signature.generics.params.is_empty() {
        return Err(Error::new(signature.generics.span(), "migration functions cannot be generic"));
    }

    let ident = &signature.ident;
    let name = match args.name {
        Some(name) if name.value().trim().is_empty() => {
            return Err(Error::new(name.span(), "`name` must not be empty"));
        }
        Some(name) => name,
        None => LitStr::new(&ident.to_string(), ident.span()),
    };
    let wrapper = format_ident!("__tidemark_migration_{}", ident);

    Ok(quote! {
        #function

        #[doc(hidden)]
        #[allow(non_snake_case)]
        fn #wrapper(ctx: ::tidemark::MigrationContext) -> ::tidemark::MigrationFuture {
            ::std::boxed::Box::pin(#ident(ctx))
        }

        ::tidemark::inventory::submit! {
            ::tidemark::MigrationRegistration::new(#sequence_value, #name, #wrapper)
        }
    })
}
