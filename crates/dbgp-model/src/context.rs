//! `context_names` reply decoding. `context_get` replies reuse
//! [`crate::property::parse_properties`] directly — a context's members
//! are just top-level `<property>` elements.

use dbgp_wire::DbgpError;

use crate::xml::parse_nodes;

/// One scope the engine exposes at the current stack depth (e.g.
/// `Locals`, `Superglobals`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextDecl {
    /// The numeric id to pass as `-c` on a subsequent `context_get`.
    pub id: u32,
    /// The engine-assigned display name.
    pub name: String,
}

/// Parse a `context_names` reply's `<context>` elements.
pub fn parse_context_names(xml: &[u8]) -> Result<Vec<ContextDecl>, DbgpError> {
    parse_nodes(xml, "context")?
        .into_iter()
        .map(|node| {
            let id = node
                .attr("id")
                .ok_or_else(|| DbgpError::ParseError("context missing id attribute".into()))?
                .parse()
                .map_err(|_| DbgpError::ParseError("context id is not a number".into()))?;
            let name = node.attr("name").unwrap_or_default().to_string();
            Ok(ContextDecl { id, name })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_test_support::must;

    #[test]
    fn parses_multiple_contexts() {
        let xml = br#"<response>
            <context name="Locals" id="0"/>
            <context name="Superglobals" id="1"/>
        </response>"#;
        let contexts = must(parse_context_names(xml));
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts[0].name, "Locals");
        assert_eq!(contexts[1].id, 1);
    }

    #[test]
    fn missing_id_is_a_parse_error() {
        let xml = br#"<response><context name="Locals"/></response>"#;
        assert!(parse_context_names(xml).is_err());
    }
}
