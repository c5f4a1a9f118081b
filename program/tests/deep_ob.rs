use rand::{rngs::StdRng, Rng, SeedableRng};
use slab_orderbook::state::critbit::{FreeNode, InnerNode, LeafNode, Node, Slab, SlabBuilder};
use slab_orderbook::state::orderbook::OrderBook;
use slab_orderbook::state::Side;
use slab_orderbook::venue::Venue;
use solana_program::pubkey::Pubkey;
pub mod common;
use crate::common::utils::UNIT_LOTS;

const VENUES: [Venue; 4] = [Venue::Serum, Venue::Zeta, Venue::MangoV3, Venue::OpenBookV2];

/// A slab mixing every node kind the way a long-lived book does.
fn random_slab(rng: &mut StdRng, venue: Venue, side: Side, node_count: usize) -> Vec<u8> {
    let owners = (0..8).map(|_| Pubkey::new_unique()).collect::<Vec<_>>();
    let mut builder = SlabBuilder::new(venue.layout(), side).with_capacity(node_count as u32);
    for seq in 0..node_count {
        let node = match rng.gen_range(0..10) {
            0 => Node::Inner(InnerNode {
                prefix_len: rng.gen_range(0..128),
                key: rng.gen(),
                children: [
                    rng.gen_range(0..node_count as u32),
                    rng.gen_range(0..node_count as u32),
                ],
            }),
            1 => Node::Free(FreeNode {
                next: rng.gen_range(0..node_count as u32),
            }),
            2 if seq % 7 == 0 => Node::LastFree(FreeNode { next: 0 }),
            _ => {
                let mut leaf = LeafNode::new(
                    LeafNode::make_key(side, rng.gen_range(1..10_000), seq as u64),
                    owners[rng.gen_range(0..owners.len())],
                    rng.gen_range(1..1_000_000),
                    rng.gen(),
                );
                leaf.owner_slot = rng.gen_range(0..128);
                Node::Leaf(leaf)
            }
        };
        builder.push(node);
    }
    builder.build()
}

#[test]
fn test_deep_orderbook_properties() {
    let mut rng = StdRng::seed_from_u64(0xA0B);
    for venue in VENUES.iter() {
        for side in [Side::Bid, Side::Ask] {
            let node_count = rng.gen_range(1..=1024);
            let buf = random_slab(&mut rng, *venue, side, node_count);
            let slab = Slab::from_buffer(&buf, venue.layout()).unwrap();
            assert_eq!(slab.nodes.len(), node_count);

            let book = OrderBook::from_slab(&slab, side, UNIT_LOTS).unwrap();
            assert_eq!(book.orders().len(), slab.header.leaf_count as usize);
            if book.is_empty() {
                continue;
            }
            let best_bid = book.best_bid().unwrap();
            let best_ask = book.best_ask().unwrap();
            assert!(book.orders().iter().all(|o| best_bid.price >= o.price));
            assert!(book.orders().iter().all(|o| best_ask.price <= o.price));

            let levels = book.levels(usize::MAX).unwrap();
            let total: u64 = book.orders().iter().map(|o| o.quantity).sum();
            assert_eq!(levels.iter().map(|l| l.quantity).sum::<u64>(), total);
            assert_eq!(levels[0].price, book.best().unwrap().price);

            let again = OrderBook::decode(&buf, venue.layout(), side, UNIT_LOTS).unwrap();
            assert_eq!(again, book);
        }
    }
}

#[test]
fn test_corrupted_tag_anywhere_fails_the_decode() {
    let mut rng = StdRng::seed_from_u64(7);
    for venue in VENUES.iter() {
        let layout = venue.layout();
        let buf = random_slab(&mut rng, *venue, Side::Bid, 64);
        for _ in 0..16 {
            let slot = rng.gen_range(0..64);
            let mut corrupted = buf.clone();
            let tag_offset = layout.node_region_offset + slot * layout.node_width;
            corrupted[tag_offset] = rng.gen_range(5..=255);
            assert!(
                OrderBook::decode(&corrupted, layout, Side::Bid, UNIT_LOTS).is_err(),
                "{:?} slot {}",
                venue,
                slot
            );
        }
    }
}
