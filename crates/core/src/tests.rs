//! Tests for field generation, commitment, proofs and header PoW

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::merkle::{
    check_deck_entries, commit_stream, deck_file_name, deck_letter, deck_spans, field_base,
};
use crate::network::NetworkParams;
use crate::pow::{diff_for_target, replay_passes, target_for_diff};
use crate::*;

/// Generator parameters small enough for a 256-byte field
fn small_params() -> SnowFallParams {
    SnowFallParams {
        passes: PASSES,
        page_size: 64,
        multiplicity: 2,
        monster_page_size: 32,
        monster_count: 4,
        write_block: 64,
    }
}

const SMALL_DECK_ENTRIES: u64 = 4;

fn small_field(dir: &Path, seed: &str, size: u64) -> (PathBuf, MerkleCommit) {
    let path = dir.join(format!("{}.snow", seed));
    generate_with(&path, seed, size, &small_params()).unwrap();
    let committed = commit_with(&path, SMALL_DECK_ENTRIES).unwrap();
    (path, committed)
}

fn service_for(path: &Path, committed: &MerkleCommit) -> ProofService<Vec<u8>> {
    let dir = path.parent().unwrap();
    let decks = DeckSet::open(
        dir,
        &field_base(path),
        committed.word_count,
        SMALL_DECK_ENTRIES,
    )
    .unwrap();
    ProofService::new(std::fs::read(path).unwrap(), Arc::new(decks)).unwrap()
}

#[test]
fn test_stream_is_deterministic() {
    let mut a = SnowStream::new("seed");
    let mut b = SnowStream::new("seed");
    let mut c = SnowStream::new("other");

    let (mut x, mut y, mut z) = ([0u8; 100], [0u8; 100], [0u8; 100]);
    a.next_bytes(&mut x);
    b.next_bytes(&mut y);
    c.next_bytes(&mut z);
    assert_eq!(x, y);
    assert_ne!(x, z);

    a.mix_bytes(b"page");
    b.mix_bytes(b"page");
    a.next_bytes(&mut x);
    b.next_bytes(&mut y);
    assert_eq!(x, y);
}

#[test]
fn test_mix_changes_stream() {
    let mut a = SnowStream::new("seed");
    let mut b = SnowStream::new("seed");
    a.mix_bytes(b"one");
    b.mix_bytes(b"two");

    let (mut x, mut y) = ([0u8; 32], [0u8; 32]);
    a.next_bytes(&mut x);
    b.next_bytes(&mut y);
    assert_ne!(x, y);
}

#[test]
fn test_generation_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.snow");
    let b = dir.path().join("b.snow");
    let c = dir.path().join("c.snow");

    generate_with(&a, "spoon.0", 1024, &small_params()).unwrap();
    generate_with(&b, "spoon.0", 1024, &small_params()).unwrap();
    generate_with(&c, "spoon.1", 1024, &small_params()).unwrap();

    let a = std::fs::read(a).unwrap();
    assert_eq!(a.len(), 1024);
    assert_eq!(a, std::fs::read(b).unwrap());
    assert_ne!(a, std::fs::read(c).unwrap());
}

#[test]
fn test_mixing_alters_initial_fill() {
    let dir = tempfile::tempdir().unwrap();
    let mixed = dir.path().join("mixed.snow");
    let plain = dir.path().join("plain.snow");

    let mut no_passes = small_params();
    no_passes.passes = 0;

    generate_with(&mixed, "seed", 1024, &small_params()).unwrap();
    generate_with(&plain, "seed", 1024, &no_passes).unwrap();
    assert_ne!(std::fs::read(mixed).unwrap(), std::fs::read(plain).unwrap());
}

#[test]
fn test_generation_rejects_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.snow");

    assert!(matches!(
        generate_with(&path, "", 256, &small_params()),
        Err(SnowError::MalformedSeed)
    ));
    assert!(matches!(
        generate_with(&path, "seed", 0, &small_params()),
        Err(SnowError::InvalidParams(_))
    ));
    assert!(matches!(
        generate_with(&path, "seed", 100, &small_params()),
        Err(SnowError::Misaligned(100))
    ));
    // one page, multiplicity two
    assert!(matches!(
        generate_with(&path, "seed", 64, &small_params()),
        Err(SnowError::InvalidParams(_))
    ));
}

#[test]
fn test_default_params_round_count() {
    let params = SnowFallParams::default();
    let size = 1024 * 1024 * 1024;
    assert_eq!(params.rounds(size), size * 7 / 4096 / 128);
    assert!(params.validate(size).is_ok());
    assert!(params.validate(4096).is_err());
}

#[test]
fn test_deck_count() {
    assert_eq!(deck_count(1024, 1024), 0);
    assert_eq!(deck_count(2048, 1024), 1);
    assert_eq!(deck_count(1 << 20, 1024), 1);
    assert_eq!(deck_count(1 << 21, 1024), 2);
    assert_eq!(deck_count(16, 4), 1);
    assert_eq!(deck_count(64, 4), 2);
    assert_eq!(deck_spans(64, 4).unwrap(), vec![4, 16]);
    assert_eq!(deck_file_name("spoon.0", 2).unwrap(), "spoon.0.deck.b");
}

#[test]
fn test_deck_letters_do_not_wrap() {
    assert_eq!(deck_letter(1), Some('a'));
    assert_eq!(deck_letter(26), Some('z'));
    assert_eq!(deck_letter(27), None);
    assert_eq!(deck_letter(0), None);
    assert!(deck_file_name("spoon.0", 27).is_err());

    // 2^40 words in decks of 2 entries would need 39 letters
    assert!(matches!(
        check_deck_entries(1 << 40, 2),
        Err(SnowError::InvalidParams(_))
    ));
    assert!(deck_spans(1 << 40, 2).is_err());
    assert!(check_deck_entries(1 << 20, 2).is_ok());
}

#[test]
fn test_deck_entries_must_be_power_of_two() {
    assert!(check_deck_entries(64, 0).is_err());
    assert!(check_deck_entries(64, 1).is_err());
    assert!(check_deck_entries(64, 6).is_err());
    assert!(check_deck_entries(64, 4).is_ok());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("odd.snow");
    std::fs::write(&path, vec![7u8; 64 * 16]).unwrap();
    assert!(commit_with(&path, 6).is_err());
}

#[test]
fn test_commit_rejects_non_power_of_two() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("odd.snow");
    std::fs::write(&path, [7u8; 48]).unwrap();
    assert!(matches!(commit(&path), Err(SnowError::NotPowerOfTwo(3))));

    std::fs::write(&path, [7u8; 40]).unwrap();
    assert!(matches!(commit(&path), Err(SnowError::Misaligned(40))));
}

#[test]
fn test_commit_matches_manual_tree() {
    let words: Vec<Word> = (0..4u8).map(|i| [i; 16]).collect();
    let data: Vec<u8> = words.concat();

    let mut no_decks: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
    let root = commit_stream(&data[..], 4, SMALL_DECK_ENTRIES, &mut no_decks).unwrap();

    let left = merkle_hash(&words[0], &words[1]);
    let right = merkle_hash(&words[2], &words[3]);
    assert_eq!(root, merkle_hash(&left, &right));
}

#[test]
fn test_deck_consistency() {
    let dir = tempfile::tempdir().unwrap();
    let (path, committed) = small_field(dir.path(), "decks", 1024);
    let data = std::fs::read(&path).unwrap();
    assert_eq!(committed.word_count, 64);
    assert_eq!(committed.decks.len(), 2);

    for (deck_path, span) in committed.decks.iter().zip(deck_spans(64, SMALL_DECK_ENTRIES).unwrap()) {
        let deck = std::fs::read(deck_path).unwrap();
        assert_eq!(deck.len() as u64, 64 / span * 16);

        for (i, entry) in deck.chunks(16).enumerate() {
            let start = i * span as usize * 16;
            let end = start + span as usize * 16;
            let mut none: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
            let subtree =
                commit_stream(&data[start..end], span, SMALL_DECK_ENTRIES, &mut none).unwrap();
            assert_eq!(entry, subtree, "deck span {} entry {}", span, i);
        }
    }
}

#[test]
fn test_proof_round_trip_all_indexes() {
    let dir = tempfile::tempdir().unwrap();
    let (path, committed) = small_field(dir.path(), "round", 1024);
    let service = service_for(&path, &committed);

    assert_eq!(service.root().unwrap(), committed.root);
    for i in 0..committed.word_count {
        let proof = service.get_proof(i).unwrap();
        assert_eq!(proof.siblings().len(), 6);
        assert_eq!(proof.word(), Some(&service.read_word(i).unwrap()));
        assert!(verify_proof(&proof, &committed.root, 1024), "index {}", i);
    }
}

#[test]
fn test_decks_do_not_change_proofs() {
    let dir = tempfile::tempdir().unwrap();
    let (path, committed) = small_field(dir.path(), "same", 1024);
    let with_decks = service_for(&path, &committed);
    let without = ProofService::new(
        std::fs::read(&path).unwrap(),
        Arc::new(DeckSet::empty(committed.word_count)),
    )
    .unwrap();

    for i in [0, 1, 17, 40, 63] {
        assert_eq!(with_decks.get_proof(i).unwrap(), without.get_proof(i).unwrap());
    }
}

#[test]
fn test_tamper_detection() {
    let dir = tempfile::tempdir().unwrap();
    let (path, committed) = small_field(dir.path(), "tamper", 1024);
    let proof = service_for(&path, &committed).get_proof(29).unwrap();
    assert!(verify_proof(&proof, &committed.root, 1024));

    for c in 0..proof.merkle_component.len() {
        for b in 0..16 {
            let mut bad = proof.clone();
            bad.merkle_component[c][b] ^= 0x01;
            assert!(!verify_proof(&bad, &committed.root, 1024));
        }
    }

    let mut moved = proof.clone();
    moved.word_index = 28;
    assert!(!verify_proof(&moved, &committed.root, 1024));
}

#[test]
fn test_range_and_shape_rejection() {
    let dir = tempfile::tempdir().unwrap();
    let (path, committed) = small_field(dir.path(), "range", 1024);
    let service = service_for(&path, &committed);
    let proof = service.get_proof(63).unwrap();

    let mut out_of_range = proof.clone();
    out_of_range.word_index = 64;
    assert!(!verify_proof(&out_of_range, &committed.root, 1024));
    out_of_range.word_index = u64::MAX;
    assert!(!verify_proof(&out_of_range, &committed.root, 1024));

    let mut short = proof.clone();
    short.merkle_component.pop();
    assert!(!verify_proof(&short, &committed.root, 1024));

    let mut long = proof.clone();
    long.merkle_component.push([0u8; 16]);
    assert!(!verify_proof(&long, &committed.root, 1024));

    let empty = SnowPowProof {
        word_index: 0,
        merkle_component: vec![],
    };
    assert!(!verify_proof(&empty, &committed.root, 1024));

    // wrong field length
    assert!(!verify_proof(&proof, &committed.root, 2048));
    assert!(!verify_proof(&proof, &committed.root, 1000));

    assert!(matches!(
        service.get_proof(64),
        Err(SnowError::OutOfRange { index: 64, .. })
    ));
}

/// 16-word field, proof for word 5
#[test]
fn test_sixteen_word_field_proof() {
    let dir = tempfile::tempdir().unwrap();
    let (path, committed) = small_field(dir.path(), "sixteen", 256);
    assert_eq!(committed.word_count, 16);

    let service = service_for(&path, &committed);
    let proof = service.get_proof(5).unwrap();
    assert_eq!(proof.siblings().len(), 4);
    assert!(verify_proof(&proof, &committed.root, 16 * 16));

    let mut bad = proof.clone();
    bad.merkle_component[0][0] ^= 0xff;
    assert!(!verify_proof(&bad, &committed.root, 16 * 16));
}

#[test]
fn test_deck_length_mismatch() {
    let mut decks = DeckSet::empty(64);
    let err = decks
        .insert("x.deck.a".into(), 4, Box::new(vec![0u8; 15 * 16]))
        .unwrap_err();
    assert!(matches!(
        err,
        SnowError::DeckLength {
            expected: 256,
            actual: 240,
            ..
        }
    ));
    assert!(decks.insert("x.deck.a".into(), 4, Box::new(vec![0u8; 16 * 16])).is_ok());
    assert_eq!(decks.spans().collect::<Vec<_>>(), vec![4]);
}

#[test]
fn test_missing_deck_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (path, committed) = small_field(dir.path(), "missing", 1024);
    std::fs::remove_file(&committed.decks[1]).unwrap();
    assert!(DeckSet::open(dir.path(), &field_base(&path), 64, SMALL_DECK_ENTRIES).is_err());
}

#[test]
fn test_proof_json() {
    let proof = SnowPowProof {
        word_index: 9,
        merkle_component: vec![[0xab; 16], [0x01; 16]],
    };
    let json = serde_json::to_string(&proof).unwrap();
    assert_eq!(
        json,
        r#"{"word_index":9,"merkle_component":["abababababababababababababababab","01010101010101010101010101010101"]}"#
    );
    let back: SnowPowProof = serde_json::from_str(&json).unwrap();
    assert_eq!(back, proof);

    let bad = r#"{"word_index":9,"merkle_component":["abab"]}"#;
    assert!(serde_json::from_str::<SnowPowProof>(bad).is_err());
}

#[test]
fn test_word_index_in_range() {
    let mut context = chain_hash(&[b"start"]);
    for word_count in [1u64, 2, 16, 1 << 20, 1 << 36] {
        for _ in 0..50 {
            assert!(next_word_index(&context, word_count) < word_count);
            context = chain_hash(&[&context]);
        }
    }
}

#[test]
fn test_word_index_ignores_top_byte() {
    let context = [3u8; 32];
    let hash = chain_hash(&[&context]);
    let mut bytes = [0u8; 8];
    bytes[1..].copy_from_slice(&hash[1..8]);
    let expected = u64::from_be_bytes(bytes);
    assert_eq!(next_word_index(&context, u64::MAX), expected);
}

#[test]
fn test_targets() {
    let t = target_for_diff(1);
    assert_eq!(t[0], 0x80);
    assert!(t[1..].iter().all(|b| *b == 0));

    let t = target_for_diff(12);
    assert_eq!(t[1], 0x10);

    assert!(less_than_target(&[0u8; 32], &t));
    assert!(!less_than_target(&[0xff; 32], &t));
    assert!(!less_than_target(&t, &t));

    assert!((diff_for_target(&target_for_diff(20)) - 20.0).abs() < 1e-6);
}

#[test]
fn test_field_seeds() {
    let mut params = NetworkParams::new("spoon");
    params.add_field(1, "shrew", 2048, [1; 16]);
    params.add_field(0, "cricket", 1024, [0; 16]);

    assert_eq!(params.field_seed(3), "spoon.3");
    assert_eq!(params.fields[0].number, 0);
    assert_eq!(params.field(1).map(|f| f.word_count()), Some(128));
    assert_eq!(params.field_seeds().get(&0).map(String::as_str), Some("spoon.0"));
    assert!(params.field(2).is_none());
}

fn mined_header(path: &Path, committed: &MerkleCommit, target: Target) -> (BlockHeader, FieldInfo) {
    let service = service_for(path, committed);
    let field = FieldInfo {
        number: 0,
        name: "tiny".into(),
        length: committed.word_count * 16,
        merkle_root: committed.root,
        activation_target: target_for_diff(0),
    };

    let mut header = BlockHeader {
        version: 1,
        block_height: 10,
        timestamp: 1_500_000_000_000,
        snow_field: 0,
        prev_block_hash: [1; 32],
        merkle_root_hash: [2; 32],
        utxo_root_hash: [3; 32],
        target,
        nonce: [4; 12],
        snow_hash: [0; 32],
        pow_proofs: vec![],
    };

    let mut context = hash_header_bits(&header, &header.nonce);
    for _ in 0..POW_LOOK_PASSES {
        let index = next_word_index(&context, committed.word_count);
        let proof = service.get_proof(index).unwrap();
        context = next_context(&context, proof.word().unwrap());
        header.pow_proofs.push(proof);
    }
    header.snow_hash = context;
    (header, field)
}

#[test]
fn test_header_pow_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (path, committed) = small_field(dir.path(), "header", 1024);
    let (header, field) = mined_header(&path, &committed, [0xff; 32]);

    assert_eq!(check_header_pow(&header, &field), Ok(()));
    assert_eq!(replay_passes(&header, &field), Ok(header.snow_hash));
}

#[test]
fn test_header_pow_rejections() {
    let dir = tempfile::tempdir().unwrap();
    let (path, committed) = small_field(dir.path(), "reject", 1024);
    let (header, field) = mined_header(&path, &committed, [0xff; 32]);

    let mut bad = header.clone();
    bad.snow_hash[0] ^= 1;
    assert_eq!(check_header_pow(&bad, &field), Err(PowError::HashMismatch));

    let mut bad = header.clone();
    bad.pow_proofs.pop();
    assert_eq!(
        check_header_pow(&bad, &field),
        Err(PowError::WrongPassCount(POW_LOOK_PASSES - 1))
    );

    let mut bad = header.clone();
    bad.nonce[0] ^= 1;
    assert!(matches!(
        check_header_pow(&bad, &field),
        Err(PowError::IndexMismatch { .. }) | Err(PowError::HashMismatch)
    ));

    let mut bad = header.clone();
    bad.pow_proofs[2].merkle_component[1][0] ^= 1;
    assert!(matches!(
        check_header_pow(&bad, &field),
        Err(PowError::BadProof(_))
    ));

    let (unlucky, _) = mined_header(&path, &committed, [0u8; 32]);
    assert_eq!(check_header_pow(&unlucky, &field), Err(PowError::AboveTarget));

    let mut bad = header;
    bad.snow_field = 1;
    assert!(matches!(
        check_header_pow(&bad, &field),
        Err(PowError::FieldMismatch { .. })
    ));
}
