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

//! Variant configs come either flat (`{id, variant_name, revision}`) or with
//! a nested `variant_ref` / `application_ref` pair.

use super::{pick_i64, pick_string, resolve_id};
use crate::resolved::VariantRef;
use serde_json::Value;

pub fn normalize_variant(raw: &Value, fallback_id: Option<&str>) -> Option<VariantRef> {
    let id = resolve_id(raw, &["id", "variant_id", "variant_ref.id"], fallback_id)?;
    Some(VariantRef {
        id,
        name: pick_string(
            raw,
            &["name", "variant_name", "config_name", "variant_ref.slug"],
        ),
        slug: pick_string(raw, &["slug", "variant_slug", "variant_ref.slug"]),
        version: pick_i64(raw, &["version", "revision", "variant_ref.version"]),
        app_id: pick_string(raw, &["app_id", "application_id", "application_ref.id"]),
    })
}
