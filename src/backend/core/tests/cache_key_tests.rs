//! Key derivation and query signature properties.

use std::collections::BTreeMap;

use aegis_core::cache::signature::sha256_hex;
use aegis_core::cache::{CacheKey, KeyPrefix, KeyType, ListQuery, ListScope, SortOrder, TenantId};
use proptest::prelude::*;

fn t1() -> TenantId {
    TenantId::new("t1").unwrap()
}

// ============================================================================
// Fixed Formats
// ============================================================================

#[test]
fn test_list_key_matches_published_format() {
    let query = ListQuery::new()
        .page(1)
        .page_size(20)
        .sort("updatedAt")
        .order(SortOrder::Desc)
        .filter("status", ["open"]);
    let sig = query.signature();

    let key = CacheKey::list(&t1(), ListScope::Active, &sig);
    assert_eq!(
        key.as_str(),
        format!("cases:t1:active:q={}", sha256_hex(sig.as_str().as_bytes()))
    );
    assert_eq!(key.key_type(), KeyType::CaseList);
}

#[test]
fn test_direct_keys() {
    assert_eq!(CacheKey::case_header(&t1(), "c9").as_str(), "case:t1:c9:header");
    assert_eq!(CacheKey::case_collabs(&t1(), "c9").as_str(), "case:t1:c9:collabs");
    assert_eq!(CacheKey::evidence_item(&t1(), "e456").as_str(), "ev:item:t1:e456");
    assert_eq!(CacheKey::evidence_tags(&t1(), "e456").as_str(), "ev:tags:t1:e456");
    assert_eq!(CacheKey::evidence_count(&t1()).as_str(), "evidence:count:tenant:t1");
}

#[test]
fn test_digest_scoped_keys() {
    let sig = ListQuery::new().signature();
    let digest = sig.digest();

    assert_eq!(
        CacheKey::list_by_user(&t1(), "u7", &sig).as_str(),
        format!("cases:t1:byUser:u7:q={}", digest)
    );
    assert_eq!(
        CacheKey::evidence_list(&t1(), "c9", &sig).as_str(),
        format!("ev:list:t1:c9:q={}", digest)
    );
    assert_eq!(
        CacheKey::dashboard_totals(&t1(), "u7", &sig).as_str(),
        format!("dashboard:t1:totals:user:u7:q={}", digest)
    );
}

#[test]
fn test_digest_is_lowercase_sha256() {
    // SHA-256 of the empty string
    assert_eq!(
        sha256_hex(b""),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    let digest = ListQuery::new().signature().digest();
    assert_eq!(digest.len(), 64);
    assert!(digest.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
}

#[test]
fn test_prefixes_cover_their_keys() {
    let sig = ListQuery::new().page(4).signature();

    assert!(KeyPrefix::list(&t1(), ListScope::Archived)
        .matches(CacheKey::list(&t1(), ListScope::Archived, &sig).as_str()));
    assert!(KeyPrefix::list_by_user(&t1(), "u1")
        .matches(CacheKey::list_by_user(&t1(), "u1", &sig).as_str()));
    assert!(KeyPrefix::evidence_lists(&t1(), "c1")
        .matches(CacheKey::evidence_list(&t1(), "c1", &sig).as_str()));
    assert!(!KeyPrefix::list(&t1(), ListScope::Active)
        .matches(CacheKey::list(&t1(), ListScope::Closed, &sig).as_str()));
}

#[test]
fn test_empty_filter_differs_from_absent_filter() {
    let absent = ListQuery::new().signature();
    let empty = ListQuery::new().filter("status", Vec::<String>::new()).signature();
    assert_ne!(absent, empty);
}

#[test]
fn test_ttls() {
    let sig = ListQuery::new().signature();
    assert_eq!(CacheKey::list(&t1(), ListScope::All, &sig).ttl().as_secs(), 120);
    assert_eq!(CacheKey::case_header(&t1(), "c").ttl().as_secs(), 300);
    assert_eq!(CacheKey::dashboard_totals(&t1(), "u", &sig).ttl().as_secs(), 60);
}

// ============================================================================
// Properties
// ============================================================================

fn filters() -> impl Strategy<Value = BTreeMap<String, Vec<String>>> {
    prop::collection::btree_map("[a-z]{1,6}", prop::collection::vec("[a-z0-9]{0,5}", 0..4), 0..4)
}

fn query_from(page: u32, size: u32, sort: &str, desc: bool, extra: &BTreeMap<String, Vec<String>>) -> ListQuery {
    let order = if desc { SortOrder::Desc } else { SortOrder::Asc };
    let mut query = ListQuery::new().page(page).page_size(size).sort(sort).order(order);
    for (name, values) in extra {
        query = query.filter(name.clone(), values.clone());
    }
    query
}

proptest! {
    #[test]
    fn prop_list_key_is_deterministic(
        page in 1u32..500,
        size in 1u32..200,
        sort in "[a-zA-Z_]{1,12}",
        desc in any::<bool>(),
        extra in filters(),
    ) {
        let a = CacheKey::list(&t1(), ListScope::Active, &query_from(page, size, &sort, desc, &extra).signature());
        let b = CacheKey::list(&t1(), ListScope::Active, &query_from(page, size, &sort, desc, &extra).signature());
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_filter_insertion_order_is_irrelevant(extra in filters()) {
        let forward = query_from(1, 20, "created_at", true, &extra);
        let mut reversed = ListQuery::new().page(1).page_size(20).sort("created_at").order(SortOrder::Desc);
        for (name, values) in extra.iter().rev() {
            let mut values = values.clone();
            values.reverse();
            reversed = reversed.filter(name.clone(), values);
        }
        prop_assert_eq!(forward.signature(), reversed.signature());
    }

    #[test]
    fn prop_distinct_queries_give_distinct_keys(
        p1 in 1u32..50, p2 in 1u32..50,
        s1 in 1u32..50, s2 in 1u32..50,
        e1 in filters(), e2 in filters(),
    ) {
        let q1 = query_from(p1, s1, "created_at", true, &e1).signature();
        let q2 = query_from(p2, s2, "created_at", true, &e2).signature();
        prop_assume!(q1 != q2);
        prop_assert_ne!(
            CacheKey::list(&t1(), ListScope::Active, &q1),
            CacheKey::list(&t1(), ListScope::Active, &q2)
        );
    }

    #[test]
    fn prop_tenants_never_share_keys(a in "[a-z0-9-]{1,12}", b in "[a-z0-9-]{1,12}", id in "[a-z0-9]{1,8}") {
        prop_assume!(a != b);
        let (ta, tb) = (TenantId::new(a).unwrap(), TenantId::new(b).unwrap());
        let sig = ListQuery::new().signature();
        prop_assert_ne!(CacheKey::case_header(&ta, &id), CacheKey::case_header(&tb, &id));
        prop_assert_ne!(
            CacheKey::list(&ta, ListScope::Active, &sig),
            CacheKey::list(&tb, ListScope::Active, &sig)
        );
    }
}
