// 🔗 Relation Registry - the fixed list of ownership relations a merge moves
//
// Each descriptor names a table and the column holding the owning account.
// Adding a relation means adding a row here; the merge executor never
// mentions relation names itself.

use crate::models::AccountKind;

const CLIENT: &[AccountKind] = &[AccountKind::Client];
const BUSINESS: &[AccountKind] = &[AccountKind::Business];
const BOTH: &[AccountKind] = &[AccountKind::Client, AccountKind::Business];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    /// Ledger name
    pub name: String,

    pub table: String,

    /// Foreign key pointing at the owning account
    pub owner_column: String,

    /// Account kinds this relation applies to
    pub kinds: Vec<AccountKind>,
}

impl RelationDescriptor {
    pub fn new(name: &str, table: &str, owner_column: &str, kinds: &[AccountKind]) -> Self {
        RelationDescriptor {
            name: name.to_string(),
            table: table.to_string(),
            owner_column: owner_column.to_string(),
            kinds: kinds.to_vec(),
        }
    }

    pub fn applies_to(&self, kind: AccountKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Reassignment statement: ?1 = primary, ?2 = secondary
    ///
    /// Re-running it on already-moved rows touches nothing.
    pub fn reassign_sql(&self) -> String {
        format!(
            "UPDATE {table} SET {col} = ?1 WHERE {col} = ?2",
            table = self.table,
            col = self.owner_column
        )
    }
}

/// Ordered list of relations reassigned during a merge
#[derive(Debug, Clone)]
pub struct RelationRegistry {
    relations: Vec<RelationDescriptor>,
}

impl RelationRegistry {
    pub fn new() -> Self {
        RelationRegistry {
            relations: Vec::new(),
        }
    }

    /// The production relation list
    pub fn standard() -> Self {
        let mut registry = RelationRegistry::new();

        registry.register(RelationDescriptor::new("contacts", "contacts", "owner_id", CLIENT));
        registry.register(RelationDescriptor::new("funds_created", "funds", "creator_id", CLIENT));
        registry.register(RelationDescriptor::new("contributions", "contributions", "contributor_id", CLIENT));
        registry.register(RelationDescriptor::new("posts", "posts", "author_id", BOTH));
        registry.register(RelationDescriptor::new("comments", "comments", "author_id", BOTH));
        registry.register(RelationDescriptor::new("reactions", "reactions", "account_id", BOTH));
        registry.register(RelationDescriptor::new("notifications", "notifications", "recipient_id", BOTH));
        registry.register(RelationDescriptor::new("favorites", "favorites", "account_id", BOTH));
        registry.register(RelationDescriptor::new("badges", "badges", "holder_id", CLIENT));
        registry.register(RelationDescriptor::new("business_accounts", "accounts", "owner_id", CLIENT));
        registry.register(RelationDescriptor::new("orders_placed", "orders", "buyer_id", CLIENT));
        registry.register(RelationDescriptor::new("orders_received", "orders", "business_id", BUSINESS));
        registry.register(RelationDescriptor::new("products", "products", "seller_id", BUSINESS));
        registry.register(RelationDescriptor::new("reciprocity_scores", "reciprocity_scores", "account_id", BOTH));
        registry.register(RelationDescriptor::new("community_scores", "community_scores", "account_id", BOTH));

        registry
    }

    pub fn register(&mut self, relation: RelationDescriptor) {
        self.relations.push(relation);
    }

    /// Relations applying to `kind`, in registration order
    pub fn for_kind(&self, kind: AccountKind) -> impl Iterator<Item = &RelationDescriptor> {
        self.relations.iter().filter(move |r| r.applies_to(kind))
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

impl Default for RelationRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
