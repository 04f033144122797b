// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use super::{pick_string, resolve_id};
use crate::resolved::ApplicationRef;
use serde_json::Value;

pub fn normalize_application(raw: &Value, fallback_id: Option<&str>) -> Option<ApplicationRef> {
    let id = resolve_id(raw, &["id", "app_id"], fallback_id)?;
    Some(ApplicationRef {
        id,
        name: pick_string(raw, &["name", "app_name"]),
        slug: pick_string(raw, &["slug", "app_slug"]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_app_name() {
        let app = normalize_application(&json!({"app_name": "Foo"}), Some("app-1")).unwrap();
        assert_eq!(app.id, "app-1");
        assert_eq!(app.name.as_deref(), Some("Foo"));
        assert_eq!(app.slug, None);
    }

    #[test]
    fn test_empty_payload_uses_fallback() {
        let app = normalize_application(&json!({}), Some("app-2")).unwrap();
        assert_eq!(
            app,
            ApplicationRef {
                id: "app-2".to_string(),
                name: None,
                slug: None,
            }
        );
    }

    #[test]
    fn test_current_shape_wins_over_legacy() {
        let raw = json!({"id": "a", "name": "New", "app_name": "Old", "app_slug": "old-slug"});
        let app = normalize_application(&raw, None).unwrap();
        assert_eq!(app.name.as_deref(), Some("New"));
        assert_eq!(app.slug.as_deref(), Some("old-slug"));
    }

    #[test]
    fn test_no_id_anywhere() {
        assert!(normalize_application(&json!({"name": "x"}), None).is_none());
        assert!(normalize_application(&json!([1, 2, 3]), None).is_none());
        assert!(normalize_application(&json!({}), Some("  ")).is_none());
    }
}
