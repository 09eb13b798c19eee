//! Property-based tests for content addressing, signatures and ranges
//!
//! Uses proptest to check the invariants every node relies on when it
//! accepts bytes or signatures from a peer.

use proptest::prelude::*;
use pubnode_core::api::parse_range;
use pubnode_core::types::documents::{connection_document, publication_document};
use pubnode_core::{Address, ContentHash, ContentStore, CreateContent, NodeKeypair, Storage, Verifier};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

// ============================================================================
// Strategy Generators
// ============================================================================

/// Arbitrary content bytes, small enough to keep cases fast
fn content_bytes_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

/// Markdown-ish post bodies
fn post_body_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[#a-zA-Z0-9][#*_a-zA-Z0-9 \n]{0,199}").expect("valid regex")
}

/// Deterministic keypairs
fn keypair_strategy() -> impl Strategy<Value = NodeKeypair> {
    any::<[u8; 32]>().prop_map(|seed| NodeKeypair::from_seed(&seed))
}

/// Timestamps across a realistic range
fn timestamp_strategy() -> impl Strategy<Value = i64> {
    1_600_000_000i64..2_000_000_000i64
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Content Addressing
// ============================================================================

proptest! {
    /// The content hash is exactly 0x + lowercase hex sha256
    #[test]
    fn content_hash_is_sha256(bytes in content_bytes_strategy()) {
        let hash = ContentHash::of(&bytes);
        let expected = format!("0x{}", hex::encode(Sha256::digest(&bytes)));
        prop_assert_eq!(hash.as_str(), expected.as_str());
        prop_assert_eq!(ContentHash::parse(&expected.to_uppercase().replace("0X", "0x")).unwrap(), hash);
    }

    /// Different bytes never collide in practice
    #[test]
    fn distinct_bytes_distinct_hashes(a in content_bytes_strategy(), b in content_bytes_strategy()) {
        prop_assume!(a != b);
        prop_assert_ne!(ContentHash::of(&a), ContentHash::of(&b));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Creating the same post twice yields one row with the same hash
    #[test]
    fn post_creation_is_idempotent(body in post_body_strategy()) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("test.redb")).unwrap();
        let store = ContentStore::new(storage.clone(), dir.path(), 1024 * 1024);

        let (first, second) = runtime().block_on(async {
            let first = store.create(CreateContent::post(body.clone())).await.unwrap();
            let second = store.create(CreateContent::post(body.clone())).await.unwrap();
            (first, second)
        });

        prop_assert_eq!(&first.content_hash, &ContentHash::of(body.as_bytes()));
        prop_assert_eq!(first, second);
        prop_assert_eq!(storage.list_contents().unwrap().len(), 1);
    }

    /// File bytes read back exactly as written
    #[test]
    fn file_bytes_survive_storage(bytes in content_bytes_strategy()) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("test.redb")).unwrap();
        let store = ContentStore::new(storage, dir.path(), 1024 * 1024);

        let read = runtime().block_on(async {
            let source = pubnode_core::BytesSource::new("blob.bin", "application/octet-stream", bytes.clone());
            let content = store.create(CreateContent::file(source)).await.unwrap();
            store.read(&content.content_hash).await.unwrap()
        });

        prop_assert_eq!(read.content.size, bytes.len() as u64);
        prop_assert_eq!(&read.bytes[..], &bytes[..]);
    }
}

// ============================================================================
// Signatures
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A signature recovers exactly its signer's address
    #[test]
    fn signature_recovers_signer(
        keypair in keypair_strategy(),
        other in keypair_strategy(),
        created_at in timestamp_strategy(),
        bytes in content_bytes_strategy(),
    ) {
        let document = publication_document(
            &other.address(),
            &keypair.address(),
            &ContentHash::of(&bytes),
            created_at,
        );
        let signature = keypair.sign_document(&document).unwrap().to_hex();
        let verifier = Verifier::default();

        prop_assert_eq!(verifier.recover_signer(&document, &signature).unwrap(), keypair.address());
        prop_assert!(verifier.verify_signer(&document, &signature, &keypair.address()));
        if other.address() != keypair.address() {
            prop_assert!(!verifier.verify_signer(&document, &signature, &other.address()));
        }
    }

    /// Changing any signed field breaks the signature
    #[test]
    fn tampered_document_fails(
        keypair in keypair_strategy(),
        timestamp in timestamp_strategy(),
        shift in 1i64..10_000,
    ) {
        let followee = keypair.address();
        let signer = NodeKeypair::from_seed(&[9u8; 32]);
        let signed = connection_document(&followee, "https://a.test", "https://b.test", timestamp);
        let signature = signer.sign_document(&signed).unwrap().to_hex();

        let altered = connection_document(&followee, "https://a.test", "https://b.test", timestamp + shift);
        let verifier = Verifier::default();
        prop_assert!(!verifier.verify_signer(&altered, &signature, &signer.address()));
    }

    /// Addresses normalize to lowercase and survive a parse round trip
    #[test]
    fn address_parse_normalizes(keypair in keypair_strategy()) {
        let address = keypair.address();
        let upper = format!("0x{}", address.as_str()[2..].to_uppercase());
        prop_assert_eq!(Address::parse(&upper).unwrap(), address.clone());
        prop_assert_eq!(address.as_str().len(), 42);
    }
}

// ============================================================================
// Byte Ranges
// ============================================================================

proptest! {
    /// Satisfiable ranges stay inside the body
    #[test]
    fn ranges_stay_in_bounds(total in 1u64..10_000, start in 0u64..10_000, len in 0u64..10_000) {
        let header = format!("bytes={}-{}", start, start + len);
        match parse_range(&header, total) {
            Ok(Some((first, last))) => {
                prop_assert!(first <= last);
                prop_assert!(last < total);
                prop_assert_eq!(first, start);
            }
            Ok(None) => prop_assert!(false, "well-formed range ignored"),
            Err(_) => prop_assert!(start >= total),
        }
    }

    /// Headers that are not a single bytes range are ignored, never rejected
    #[test]
    fn foreign_headers_ignored(total in 1u64..10_000, junk in "[a-z]{1,10}=[0-9]{1,4}-[0-9]{1,4}") {
        prop_assume!(!junk.starts_with("bytes="));
        prop_assert_eq!(parse_range(&junk, total).unwrap(), None);
    }
}
