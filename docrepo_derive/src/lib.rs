use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::{Data, DeriveInput, Fields, Ident, LitStr, Token, parse_macro_input, spanned::Spanned};

/// Storage names owned by `DocumentBase`; entity fields may not reuse them.
const BASE_FIELD_NAMES: [&str; 5] = ["_id", "createdAt", "createdBy", "modifiedAt", "modifiedBy"];

#[proc_macro_derive(Document, attributes(document))]
pub fn derive_document(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_document(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

struct DocumentOptions {
    collection: Option<LitStr>,
    rename_all: Option<RenameRule>,
}

#[derive(Default)]
struct FieldOptions {
    base: bool,
    skip: bool,
    rename: Option<String>,
    flatten: bool,
}

#[derive(Clone, Copy)]
enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
    ScreamingKebab,
}

impl RenameRule {
    fn parse(lit: &LitStr) -> syn::Result<Self> {
        Ok(match lit.value().as_str() {
            "lowercase" => Self::Lower,
            "UPPERCASE" => Self::Upper,
            "PascalCase" => Self::Pascal,
            "camelCase" => Self::Camel,
            "snake_case" => Self::Snake,
            "SCREAMING_SNAKE_CASE" => Self::ScreamingSnake,
            "kebab-case" => Self::Kebab,
            "SCREAMING-KEBAB-CASE" => Self::ScreamingKebab,
            other => {
                return Err(syn::Error::new(
                    lit.span(),
                    format!("unknown rename_all rule \"{}\"", other),
                ));
            }
        })
    }

    fn apply(self, field: &str) -> String {
        match self {
            Self::Lower | Self::Snake => field.to_string(),
            Self::Upper | Self::ScreamingSnake => field.to_ascii_uppercase(),
            Self::Pascal => to_pascal_case(field),
            Self::Camel => {
                let pascal = to_pascal_case(field);
                let mut chars = pascal.chars();
                match chars.next() {
                    Some(first) => first.to_lowercase().chain(chars).collect(),
                    None => pascal,
                }
            }
            Self::Kebab => field.replace('_', "-"),
            Self::ScreamingKebab => field.to_ascii_uppercase().replace('_', "-"),
        }
    }
}

fn expand_document(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "Document does not support generic structs",
        ));
    }

    let options = parse_document_options(&input.attrs)?;
    let collection = options.collection.ok_or_else(|| {
        syn::Error::new(
            struct_name.span(),
            "#[derive(Document)] requires #[document(collection = \"...\")]",
        )
    })?;

    let named_fields = match input.data {
        Data::Struct(data) => match data.fields {
            Fields::Named(fields) => fields,
            _ => {
                return Err(syn::Error::new(
                    struct_name.span(),
                    "Document requires named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Document can only be derived for structs",
            ));
        }
    };

    let mut base_field: Option<Ident> = None;
    let mut field_idents = Vec::<Ident>::new();
    let mut field_names = Vec::<String>::new();

    for field in named_fields.named {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "Document requires named fields"))?;
        let field_options = parse_field_options(&field.attrs)?;

        if field_options.base {
            if base_field.is_some() {
                return Err(syn::Error::new(
                    ident.span(),
                    "only one field may be marked #[document(base)]",
                ));
            }
            if !field_options.flatten {
                return Err(syn::Error::new(
                    ident.span(),
                    "the #[document(base)] field must also be #[serde(flatten)]",
                ));
            }
            base_field = Some(ident);
            continue;
        }
        if field_options.flatten {
            return Err(syn::Error::new(
                ident.span(),
                "#[serde(flatten)] is only supported on the #[document(base)] field",
            ));
        }
        if field_options.skip {
            continue;
        }

        let raw_name = ident.to_string();
        let raw_name = raw_name.trim_start_matches("r#");
        let name = match (field_options.rename, options.rename_all) {
            (Some(rename), _) => rename,
            (None, Some(rule)) => rule.apply(raw_name),
            (None, None) => raw_name.to_string(),
        };
        if BASE_FIELD_NAMES.contains(&name.as_str()) {
            return Err(syn::Error::new(
                ident.span(),
                format!("field storage name \"{}\" is reserved by DocumentBase", name),
            ));
        }
        if field_names.contains(&name) {
            return Err(syn::Error::new(
                ident.span(),
                format!("duplicate field storage name \"{}\"", name),
            ));
        }
        field_idents.push(ident);
        field_names.push(name);
    }

    let base_field = base_field.ok_or_else(|| {
        syn::Error::new(
            struct_name.span(),
            "Document requires one `DocumentBase` field marked #[document(base)]",
        )
    })?;

    Ok(quote! {
        impl ::docrepo::Document for #struct_name {
            const COLLECTION: &'static str = #collection;

            fn base(&self) -> &::docrepo::DocumentBase {
                &self.#base_field
            }

            fn base_mut(&mut self) -> &mut ::docrepo::DocumentBase {
                &mut self.#base_field
            }

            fn field_values(&self) -> ::docrepo::Result<::std::vec::Vec<::docrepo::FieldValue>> {
                ::std::result::Result::Ok(::std::vec![
                    #(
                        ::docrepo::FieldValue::new(
                            #field_names,
                            ::docrepo::__private::serde_json::to_value(&self.#field_idents)?,
                        ),
                    )*
                    ::docrepo::FieldValue::new(
                        ::docrepo::MODIFIED_BY_FIELD,
                        ::docrepo::__private::serde_json::to_value(&self.#base_field.modified_by)?,
                    ),
                ])
            }
        }
    })
}

fn parse_document_options(attrs: &[syn::Attribute]) -> syn::Result<DocumentOptions> {
    let mut options = DocumentOptions {
        collection: None,
        rename_all: None,
    };

    for attr in attrs {
        if attr.path().is_ident("document") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("collection") {
                    if options.collection.is_some() {
                        return Err(meta.error("duplicate `collection` option"));
                    }
                    let value = meta.value()?;
                    options.collection = Some(value.parse()?);
                    return Ok(());
                }
                Err(meta.error(
                    "Unsupported #[document(...)] option. Supported: collection = \"...\"",
                ))
            })?;
        } else if attr.path().is_ident("serde") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename_all") {
                    if meta.input.peek(Token![=]) {
                        let lit: LitStr = meta.value()?.parse()?;
                        options.rename_all = Some(RenameRule::parse(&lit)?);
                    } else {
                        meta.parse_nested_meta(|inner| {
                            if inner.path.is_ident("serialize") {
                                let lit: LitStr = inner.value()?.parse()?;
                                options.rename_all = Some(RenameRule::parse(&lit)?);
                                return Ok(());
                            }
                            skip_meta(inner)
                        })?;
                    }
                    return Ok(());
                }
                skip_meta(meta)
            })?;
        }
    }

    Ok(options)
}

fn parse_field_options(attrs: &[syn::Attribute]) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions::default();

    for attr in attrs {
        if attr.path().is_ident("document") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("base") {
                    options.base = true;
                    return Ok(());
                }
                if meta.path.is_ident("skip") {
                    options.skip = true;
                    return Ok(());
                }
                Err(meta.error("Unsupported #[document(...)] field option. Supported: base, skip"))
            })?;
        } else if attr.path().is_ident("serde") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") {
                    if meta.input.peek(Token![=]) {
                        let lit: LitStr = meta.value()?.parse()?;
                        options.rename = Some(lit.value());
                    } else {
                        meta.parse_nested_meta(|inner| {
                            if inner.path.is_ident("serialize") {
                                let lit: LitStr = inner.value()?.parse()?;
                                options.rename = Some(lit.value());
                                return Ok(());
                            }
                            skip_meta(inner)
                        })?;
                    }
                    return Ok(());
                }
                if meta.path.is_ident("skip") || meta.path.is_ident("skip_serializing") {
                    options.skip = true;
                    return Ok(());
                }
                if meta.path.is_ident("flatten") {
                    options.flatten = true;
                    return Ok(());
                }
                skip_meta(meta)
            })?;
        }
    }

    Ok(options)
}

/// Consumes a serde option this derive does not interpret.
fn skip_meta(meta: ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(Token![=]) {
        meta.value()?.parse::<syn::Expr>()?;
    } else if meta.input.peek(syn::token::Paren) {
        meta.parse_nested_meta(skip_meta)?;
    }
    Ok(())
}

fn to_pascal_case(value: &str) -> String {
    let mut out = String::new();
    for chunk in value.split('_').filter(|part| !part.is_empty()) {
        let mut chars = chunk.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    if out.is_empty() {
        value.to_string()
    } else {
        out
    }
}
