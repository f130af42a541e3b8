//! Model Selector
//!
//! Maps `(role, provider, tier)` to a concrete model identifier. Pure table
//! lookup: no I/O, and never fails. Premium and unlimited subscribers share
//! a column; embedding requests get the provider's fixed embedding model
//! regardless of tier.

use crate::providers::ProviderKind;
use crate::providers::types::{ModelRole, SubscriptionTier};

/// Returned when no table entry matches.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

struct ModelRow {
    basic: &'static str,
    premium: &'static str,
    embed: &'static str,
}

const RELAY: ModelRow = ModelRow {
    basic: "anthropic/claude-3.5-haiku",
    premium: "anthropic/claude-sonnet-4",
    embed: "openai/text-embedding-3-small",
};

const DIRECT: ModelRow = ModelRow {
    basic: "gpt-4o-mini",
    premium: "gpt-4o",
    embed: "text-embedding-3-small",
};

const BUDGET: ModelRow = ModelRow {
    basic: "deepseek-chat",
    premium: "deepseek-reasoner",
    embed: "deepseek-embed",
};

const LOCAL: ModelRow = ModelRow {
    basic: "llama3.2:3b",
    premium: "llama3.1:8b",
    embed: "nomic-embed-text",
};

fn row(kind: ProviderKind) -> &'static ModelRow {
    match kind {
        ProviderKind::Relay => &RELAY,
        ProviderKind::Direct => &DIRECT,
        ProviderKind::Budget => &BUDGET,
        ProviderKind::Local => &LOCAL,
    }
}

/// Pick the model for a request.
///
/// `Reasoning` is a hint only; it resolves through the same tier column as
/// `Chat`.
pub fn select_model(role: ModelRole, kind: ProviderKind, tier: SubscriptionTier) -> &'static str {
    let row = row(kind);
    let model = match (role, tier) {
        (ModelRole::Embed, _) => row.embed,
        (_, SubscriptionTier::Basic) => row.basic,
        (_, SubscriptionTier::Premium | SubscriptionTier::Unlimited) => row.premium,
    };
    if model.is_empty() { DEFAULT_MODEL } else { model }
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_role() -> impl Strategy<Value = ModelRole> {
        prop_oneof![
            Just(ModelRole::Chat),
            Just(ModelRole::Reasoning),
            Just(ModelRole::Embed)
        ]
    }

    fn any_kind() -> impl Strategy<Value = ProviderKind> {
        prop::sample::select(ProviderKind::PRIORITY.to_vec())
    }

    fn any_tier() -> impl Strategy<Value = SubscriptionTier> {
        prop_oneof![
            Just(SubscriptionTier::Basic),
            Just(SubscriptionTier::Premium),
            Just(SubscriptionTier::Unlimited)
        ]
    }

    #[test]
    fn test_tier_columns() {
        assert_eq!(
            select_model(ModelRole::Chat, ProviderKind::Direct, SubscriptionTier::Basic),
            "gpt-4o-mini"
        );
        assert_eq!(
            select_model(ModelRole::Chat, ProviderKind::Direct, SubscriptionTier::Premium),
            "gpt-4o"
        );
        assert_eq!(
            select_model(ModelRole::Chat, ProviderKind::Direct, SubscriptionTier::Unlimited),
            "gpt-4o"
        );
        assert_eq!(
            select_model(ModelRole::Reasoning, ProviderKind::Budget, SubscriptionTier::Premium),
            "deepseek-reasoner"
        );
    }

    #[test]
    fn test_embed_ignores_tier() {
        for tier in [
            SubscriptionTier::Basic,
            SubscriptionTier::Premium,
            SubscriptionTier::Unlimited,
        ] {
            assert_eq!(
                select_model(ModelRole::Embed, ProviderKind::Local, tier),
                "nomic-embed-text"
            );
        }
    }


    proptest! {
        #[test]
        fn prop_selection_is_deterministic(role in any_role(), kind in any_kind(), tier in any_tier()) {
            prop_assert_eq!(select_model(role, kind, tier), select_model(role, kind, tier));
            prop_assert!(!select_model(role, kind, tier).is_empty());
        }

        #[test]
        fn prop_embed_is_fixed_per_provider(kind in any_kind(), a in any_tier(), b in any_tier()) {
            prop_assert_eq!(
                select_model(ModelRole::Embed, kind, a),
                select_model(ModelRole::Embed, kind, b)
            );
        }
    }
}
