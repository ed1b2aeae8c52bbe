use proc_macro::TokenStream;
use proc_macro_crate::{FoundCrate, crate_name};
use quote::quote;
use syn::{
    Data, DeriveInput, Error, Fields, GenericArgument, PathArguments, ReturnType, Type,
    parse_macro_input, spanned::Spanned,
};

/// Derive macro for vigil's `ShmSafe` trait.
///
/// Generates the `unsafe impl` after checking, at compile time, the parts
/// of the contract a macro can see:
///
/// 1. **Stable layout** — the item must carry `#[repr(C)]`,
///    `#[repr(transparent)]`, or an integer repr for enums. The processes
///    mapping a region may be separate builds, and the default Rust layout
///    is not stable between them.
/// 2. **No addresses** — fields must not contain types that hold
///    process-local pointers (`Vec`, `Box`, `String`, `Rc`, `Arc`,
///    references, raw pointers) or process-local synchronization
///    (`Mutex`, `RwLock`, `Condvar`, `Barrier`).
/// 3. **Recursive safety** — every field type gets a `ShmSafe` bound in
///    the generated `where` clause.
///
/// What the macro cannot check stays the implementer's promise: the
/// all-zero byte pattern must be the type's valid initial state (regions
/// are created zero-filled and no constructor runs in them), concurrent
/// access must be mediated by the fields themselves, and nothing may rely
/// on `Drop` running — a crashed process runs no destructors.
///
/// # Example
///
/// ```
/// use vigil::{ProcLock, SharedAtomic, ShmSafe};
///
/// #[derive(ShmSafe)]
/// #[repr(C)]
/// struct Scoreboard {
///     lock: ProcLock,
///     total: SharedAtomic<u64>,
///     slots: [SharedAtomic<u32>; 16],
/// }
/// ```
///
/// # Rejected shapes
///
/// ```compile_fail
/// # use vigil::ShmSafe;
/// #[derive(ShmSafe)]
/// struct NoRepr { // missing #[repr(C)]
///     x: u32,
/// }
/// ```
///
/// ```compile_fail
/// # use vigil::ShmSafe;
/// #[derive(ShmSafe)]
/// #[repr(C)]
/// struct OwnsHeap {
///     names: Vec<u8>, // heap pointer; addresses don't cross processes
/// }
/// ```
#[proc_macro_derive(ShmSafe)]
pub fn derive_shm_safe(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
    check_repr(&input)?;

    let field_types = field_types(&input.data)?;
    for ty in &field_types {
        reject_address_holders(ty, ty)?;
    }

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let krate = crate_path();

    let mut predicates = where_clause
        .map(|w| w.predicates.iter().cloned().collect::<Vec<_>>())
        .unwrap_or_default();
    for ty in &field_types {
        predicates.push(syn::parse_quote!(#ty: #krate::__ShmSafePrivate));
    }

    let expanded = quote! {
        unsafe impl #impl_generics #krate::__ShmSafePrivate for #name #ty_generics
        where
            #(#predicates,)*
        {}
    };
    Ok(expanded.into())
}

fn crate_path() -> proc_macro2::TokenStream {
    match crate_name("vigil") {
        Ok(FoundCrate::Name(name)) => {
            let ident = syn::Ident::new(&name, proc_macro2::Span::call_site());
            quote!(::#ident)
        }
        // Inside vigil itself (or when resolution fails) the crate is
        // reachable as ::vigil via its `extern crate self` alias.
        Ok(FoundCrate::Itself) | Err(_) => quote!(::vigil),
    }
}

/// Layout reprs that pin the field order and padding across builds.
fn is_stable_repr(ident: &syn::Ident) -> bool {
    const STABLE: &[&str] = &[
        "C", "transparent", "u8", "u16", "u32", "u64", "u128", "usize", "i8", "i16", "i32", "i64",
        "i128", "isize",
    ];
    STABLE.iter().any(|name| ident == name)
}

fn check_repr(input: &DeriveInput) -> syn::Result<()> {
    let mut stable = false;
    for attr in &input.attrs {
        if !attr.path().is_ident("repr") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if let Some(ident) = meta.path.get_ident()
                && is_stable_repr(ident)
            {
                stable = true;
            }
            Ok(())
        })?;
    }

    if stable {
        return Ok(());
    }
    let help = if matches!(input.data, Data::Enum(_)) {
        "ShmSafe needs a stable layout: add #[repr(C)] or an integer repr like #[repr(u8)]"
    } else {
        "ShmSafe needs a stable layout: add #[repr(C)] or #[repr(transparent)]"
    };
    Err(Error::new(input.span(), help))
}

fn field_types(data: &Data) -> syn::Result<Vec<Type>> {
    fn of_fields(fields: &Fields) -> Vec<Type> {
        match fields {
            Fields::Named(named) => named.named.iter().map(|f| f.ty.clone()).collect(),
            Fields::Unnamed(unnamed) => unnamed.unnamed.iter().map(|f| f.ty.clone()).collect(),
            Fields::Unit => Vec::new(),
        }
    }

    match data {
        Data::Struct(s) => Ok(of_fields(&s.fields)),
        Data::Enum(e) => Ok(e.variants.iter().flat_map(|v| of_fields(&v.fields)).collect()),
        Data::Union(u) => Err(Error::new(
            u.union_token.span,
            "ShmSafe cannot be derived for unions",
        )),
    }
}

/// Type names whose values hold process-local addresses or state, paired
/// with the advice we print.
const FORBIDDEN: &[(&str, &str)] = &[
    ("Vec", "owns heap memory; use an inline array like [T; N]"),
    ("Box", "owns heap memory; store the value inline"),
    ("String", "owns heap memory; use an inline [u8; N]"),
    ("PathBuf", "owns heap memory; use an inline [u8; N]"),
    ("OsString", "owns heap memory; use an inline [u8; N]"),
    ("CString", "owns heap memory; use an inline [u8; N]"),
    ("Rc", "reference counts are process-local"),
    ("Arc", "reference counts are process-local"),
    ("Mutex", "process-local lock; use ProcLock or atomics"),
    ("RwLock", "process-local lock; use ProcLock or atomics"),
    ("Condvar", "process-local; cannot signal across processes"),
    ("Barrier", "process-local; cannot rendezvous across processes"),
];

/// Walks a field type and rejects anything address-shaped, however deeply
/// it is nested in generics, tuples, or arrays.
fn reject_address_holders(ty: &Type, field_ty: &Type) -> syn::Result<()> {
    match ty {
        Type::Path(path) => {
            for segment in &path.path.segments {
                if let Some((_, why)) = FORBIDDEN.iter().find(|(name, _)| segment.ident == name) {
                    return Err(Error::new(
                        segment.ident.span(),
                        format!(
                            "field type `{}` contains `{}`, which cannot live in shared \
                             memory: {}",
                            quote!(#field_ty),
                            segment.ident,
                            why,
                        ),
                    ));
                }
                match &segment.arguments {
                    PathArguments::AngleBracketed(args) => {
                        for arg in &args.args {
                            if let GenericArgument::Type(inner) = arg {
                                reject_address_holders(inner, field_ty)?;
                            }
                        }
                    }
                    PathArguments::Parenthesized(args) => {
                        for input in &args.inputs {
                            reject_address_holders(input, field_ty)?;
                        }
                        if let ReturnType::Type(_, output) = &args.output {
                            reject_address_holders(output, field_ty)?;
                        }
                    }
                    PathArguments::None => {}
                }
            }
            Ok(())
        }
        Type::Reference(r) => Err(Error::new(
            r.span(),
            format!(
                "field type `{}` contains a reference; addresses do not cross process \
                 boundaries",
                quote!(#field_ty),
            ),
        )),
        Type::Ptr(p) => Err(Error::new(
            p.span(),
            format!(
                "field type `{}` contains a raw pointer; addresses do not cross process \
                 boundaries",
                quote!(#field_ty),
            ),
        )),
        Type::Tuple(tuple) => tuple
            .elems
            .iter()
            .try_for_each(|elem| reject_address_holders(elem, field_ty)),
        Type::Array(array) => reject_address_holders(&array.elem, field_ty),
        Type::Slice(slice) => reject_address_holders(&slice.elem, field_ty),
        Type::Group(group) => reject_address_holders(&group.elem, field_ty),
        Type::Paren(paren) => reject_address_holders(&paren.elem, field_ty),
        // Remaining variants either cannot appear as struct fields or carry
        // no nested types we police.
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    fn scan(ty: Type) -> syn::Result<()> {
        reject_address_holders(&ty, &ty)
    }

    #[test]
    fn accepts_stable_reprs() {
        let c: DeriveInput = parse_quote! {
            #[repr(C)]
            struct A { x: u32 }
        };
        let transparent: DeriveInput = parse_quote! {
            #[repr(transparent)]
            struct B(u64);
        };
        let int_enum: DeriveInput = parse_quote! {
            #[repr(u8)]
            enum C { On, Off }
        };
        assert!(check_repr(&c).is_ok());
        assert!(check_repr(&transparent).is_ok());
        assert!(check_repr(&int_enum).is_ok());
    }

    #[test]
    fn rejects_default_layout() {
        let input: DeriveInput = parse_quote! {
            struct A { x: u32 }
        };
        assert!(check_repr(&input).is_err());

        let aligned_only: DeriveInput = parse_quote! {
            #[repr(align(64))]
            struct B { x: u32 }
        };
        assert!(check_repr(&aligned_only).is_err());
    }

    #[test]
    fn accepts_plain_data() {
        assert!(scan(parse_quote!(u64)).is_ok());
        assert!(scan(parse_quote!([u8; 4096])).is_ok());
        assert!(scan(parse_quote!((u32, i64))).is_ok());
        assert!(scan(parse_quote!(SharedAtomic<u64>)).is_ok());
        assert!(scan(parse_quote!(Option<u32>)).is_ok());
    }

    #[test]
    fn rejects_heap_owners() {
        assert!(scan(parse_quote!(Vec<u8>)).is_err());
        assert!(scan(parse_quote!(Box<u32>)).is_err());
        assert!(scan(parse_quote!(String)).is_err());
        assert!(scan(parse_quote!(std::path::PathBuf)).is_err());
        assert!(scan(parse_quote!(CString)).is_err());
    }

    #[test]
    fn rejects_reference_counting() {
        assert!(scan(parse_quote!(Rc<u32>)).is_err());
        assert!(scan(parse_quote!(Arc<[u8; 16]>)).is_err());
    }

    #[test]
    fn rejects_process_local_sync() {
        assert!(scan(parse_quote!(Mutex<u64>)).is_err());
        assert!(scan(parse_quote!(RwLock<u64>)).is_err());
        assert!(scan(parse_quote!(Condvar)).is_err());
        assert!(scan(parse_quote!(Barrier)).is_err());
    }

    #[test]
    fn rejects_addresses() {
        assert!(scan(parse_quote!(&u32)).is_err());
        assert!(scan(parse_quote!(&mut u32)).is_err());
        assert!(scan(parse_quote!(*const u8)).is_err());
        assert!(scan(parse_quote!(*mut u8)).is_err());
    }

    #[test]
    fn rejects_nested_offenders() {
        assert!(scan(parse_quote!(Option<Vec<u8>>)).is_err());
        assert!(scan(parse_quote!([Box<u8>; 2])).is_err());
        assert!(scan(parse_quote!((u32, Arc<u8>))).is_err());
        assert!(scan(parse_quote!(Result<u32, String>)).is_err());
    }

    #[test]
    fn collects_field_types() {
        let named: DeriveInput = parse_quote! {
            struct A { x: u32, y: u64 }
        };
        assert_eq!(field_types(&named.data).unwrap().len(), 2);

        let tuple: DeriveInput = parse_quote! {
            struct B(u8, u16, u32);
        };
        assert_eq!(field_types(&tuple.data).unwrap().len(), 3);

        let unit: DeriveInput = parse_quote! {
            struct C;
        };
        assert!(field_types(&unit.data).unwrap().is_empty());

        let variants: DeriveInput = parse_quote! {
            enum D { A(u32), B { x: u64 }, C }
        };
        assert_eq!(field_types(&variants.data).unwrap().len(), 2);
    }

    #[test]
    fn rejects_unions() {
        let input: DeriveInput = parse_quote! {
            union U { a: u32, b: f32 }
        };
        assert!(field_types(&input.data).is_err());
    }
}
