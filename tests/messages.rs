//! Token-ordering properties of the message store.

use proptest::prelude::*;

use flowbuild::message::{ChatMessage, MessageStore, TokenDelta};

fn store_with_message(id: &str) -> MessageStore {
    let store = MessageStore::new();
    let mut message = ChatMessage::machine("");
    message.id = id.to_string();
    store.add(message);
    store
}

fn delta(id: &str, chunk: &str, seq: u64) -> TokenDelta {
    TokenDelta {
        id: id.to_string(),
        chunk: chunk.to_string(),
        seq: Some(seq),
    }
}

proptest! {
    /// Any arrival permutation of sequence-numbered tokens yields the text
    /// of the in-order concatenation.
    #[test]
    fn permuted_tokens_yield_in_order_text(
        chunks in proptest::collection::vec("[a-z]{1,4}", 1..12),
        shuffle_seed in any::<u64>(),
    ) {
        let expected: String = chunks.concat();

        // Deterministic pseudo-shuffle of the application order.
        let mut order: Vec<usize> = (0..chunks.len()).collect();
        let mut state = shuffle_seed;
        for i in (1..order.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            order.swap(i, (state % (i as u64 + 1)) as usize);
        }

        let store = store_with_message("m1");
        for index in order {
            store.apply_token(&delta("m1", &chunks[index], index as u64));
        }
        prop_assert_eq!(store.text_of("m1").unwrap(), expected.clone());

        // Replaying the whole sequence changes nothing.
        for (index, chunk) in chunks.iter().enumerate() {
            store.apply_token(&delta("m1", chunk, index as u64));
        }
        prop_assert_eq!(store.text_of("m1").unwrap(), expected);
    }
}

#[test]
fn tokens_interleave_across_messages_independently() {
    let store = store_with_message("m1");
    let mut other = ChatMessage::machine("");
    other.id = "m2".to_string();
    store.add(other);

    store.apply_token(&delta("m2", "beta", 0));
    store.apply_token(&delta("m1", "alpha", 0));
    store.apply_token(&delta("m2", "!", 1));

    assert_eq!(store.text_of("m1").as_deref(), Some("alpha"));
    assert_eq!(store.text_of("m2").as_deref(), Some("beta!"));
}
