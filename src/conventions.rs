//! Naming Conventions - Laravel-style derivation of table, key, and column names
//!
//! Every relation kind falls back to these helpers when the caller does not
//! supply explicit key or table names.

/// Convert a model name to snake_case (`BlogPost` -> `blog_post`).
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// Simple pluralization (English-centric)
pub fn pluralize(name: &str) -> String {
    if name.ends_with('y')
        && !name.ends_with("ay")
        && !name.ends_with("ey")
        && !name.ends_with("iy")
        && !name.ends_with("oy")
        && !name.ends_with("uy")
    {
        format!("{}ies", &name[..name.len() - 1])
    } else if name.ends_with('s')
        || name.ends_with("sh")
        || name.ends_with("ch")
        || name.ends_with('x')
        || name.ends_with('z')
    {
        format!("{}es", name)
    } else {
        format!("{}s", name)
    }
}

/// Simple singularization (English-centric)
pub fn singularize(name: &str) -> String {
    if name.ends_with("ies") {
        format!("{}y", &name[..name.len() - 3])
    } else if name.ends_with("ses")
        || name.ends_with("ches")
        || name.ends_with("shes")
        || name.ends_with("xes")
        || name.ends_with("zes")
    {
        name[..name.len() - 2].to_string()
    } else if name.ends_with('s') && name.len() > 1 {
        name[..name.len() - 1].to_string()
    } else {
        name.to_string()
    }
}

/// Infer a table name from a model name (`Invoice` -> `invoices`).
pub fn table_name(model_name: &str) -> String {
    pluralize(&snake_case(model_name))
}

/// Infer the foreign key column a model exposes (`Order` -> `order_id`).
pub fn foreign_key(model_name: &str) -> String {
    format!("{}_id", snake_case(model_name))
}

/// Infer a pivot table name from two model names.
///
/// Segments are singular snake_case model names, sorted alphabetically
/// (`Post` + `Tag` -> `post_tag`).
pub fn pivot_table(model_a: &str, model_b: &str) -> String {
    let mut segments = [snake_case(model_a), snake_case(model_b)];
    segments.sort();
    segments.join("_")
}

/// Infer polymorphic column names from a morph name
/// (`commentable` -> `commentable_type`, `commentable_id`).
pub fn morph_columns(name: &str) -> (String, String) {
    (format!("{}_type", name), format!("{}_id", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("Invoice"), "invoice");
        assert_eq!(snake_case("BlogPost"), "blog_post");
        assert_eq!(snake_case("order"), "order");
        assert_eq!(snake_case("HTTPRequest"), "httprequest");
    }

    #[test]
    fn test_pluralization() {
        assert_eq!(pluralize("user"), "users");
        assert_eq!(pluralize("invoice"), "invoices");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("key"), "keys");
    }

    #[test]
    fn test_singularization() {
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("invoices"), "invoice");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("boxes"), "box");
    }

    #[test]
    fn test_table_name() {
        assert_eq!(table_name("Invoice"), "invoices");
        assert_eq!(table_name("BlogPost"), "blog_posts");
    }

    #[test]
    fn test_foreign_key() {
        assert_eq!(foreign_key("Order"), "order_id");
        assert_eq!(foreign_key("BlogPost"), "blog_post_id");
    }

    #[test]
    fn test_pivot_table() {
        assert_eq!(pivot_table("Post", "Tag"), "post_tag");
        assert_eq!(pivot_table("Tag", "Post"), "post_tag");
        assert_eq!(pivot_table("Order", "Invoice"), "invoice_order");
    }

    #[test]
    fn test_morph_columns() {
        let (type_col, id_col) = morph_columns("commentable");
        assert_eq!(type_col, "commentable_type");
        assert_eq!(id_col, "commentable_id");
    }
}
