use super::handlers::{health, oauth};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Documented routes. Anything registered here is served and shows up in
/// `/apidocs.json`.
pub(crate) fn api_router() -> OpenApiRouter {
    OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::healthz))
        .routes(routes!(health::version))
        .routes(routes!(oauth::token))
        .routes(routes!(oauth::static_token))
        .routes(routes!(oauth::logout))
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(non_empty(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    // Cargo authors are `;` separated, each "Name <email>"
    info.contact = env!("CARGO_PKG_AUTHORS")
        .split(';')
        .next()
        .and_then(contact);
    info.license = non_empty(env!("CARGO_PKG_LICENSE")).map(|identifier| {
        let mut license = License::new(identifier);
        license.identifier = Some(identifier.to_string());
        license
    });

    OpenApiBuilder::new()
        .info(info)
        .tags(Some(vec![
            tag("health", "Liveness and build information"),
            tag("oauth", "Token issuance and revocation"),
        ]))
        .build()
}

fn non_empty(value: &'static str) -> Option<&'static str> {
    Some(value.trim()).filter(|value| !value.is_empty())
}

fn contact(author: &str) -> Option<Contact> {
    let (name, email) = match author.split_once('<') {
        Some((name, email)) => (name.trim(), email.trim_end_matches('>').trim()),
        None => (author.trim(), ""),
    };
    if name.is_empty() && email.is_empty() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = Some(name.to_string()).filter(|name| !name.is_empty());
    contact.email = Some(email.to_string()).filter(|email| !email.is_empty());
    Some(contact)
}
