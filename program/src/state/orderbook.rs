use rust_decimal::Decimal;
use solana_program::pubkey::Pubkey;
use std::cmp::Reverse;
use std::sync::Arc;

use crate::{
    error::{ObResult, OrderBookError},
    lot_math::MarketLots,
    state::{
        critbit::{Node, NodeHandle, Slab, SlabHeader},
        Side,
    },
    venue::VenueLayout,
};

/// A live order read from a slab leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub side: Side,
    /// Slot of the leaf in the slab
    pub slot: NodeHandle,
    pub order_id: u128,
    pub sequence_number: u64,
    /// Price in quote lots per base lot. Oracle-pegged orders keep the biased
    /// offset stored in their key here.
    pub price: u64,
    /// Quantity in base lots
    pub quantity: u64,
    /// The decimal price, or the decimal offset from the oracle price for
    /// pegged orders
    pub float_price: Decimal,
    pub float_quantity: Decimal,
    pub client_order_id: u64,
    pub owner: Pubkey,
    pub owner_slot: u8,
    pub timestamp: u64,
    /// Offset from the oracle price in quote lots, set for oracle-pegged orders
    pub peg_offset: Option<i64>,
}

impl Order {
    pub fn is_pegged(&self) -> bool {
        self.peg_offset.is_some()
    }
}

/// Aggregated quantity at one price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: u64,
    pub quantity: u64,
    pub float_price: Decimal,
    pub float_quantity: Decimal,
    pub order_count: usize,
}

fn peg_offset_to_decimal(offset: i64, lots: &MarketLots) -> ObResult<Decimal> {
    let magnitude = lots.price_to_decimal(offset.unsigned_abs())?;
    Ok(if offset < 0 { -magnitude } else { magnitude })
}

/// Selects the live leaves of `nodes` and converts them to orders, in slot order.
/// Leaves whose slot is listed in the sorted `pegged` belong to the oracle-pegged tree.
pub fn assemble_orders(
    nodes: &[Node],
    pegged: &[NodeHandle],
    side: Side,
    lots: &MarketLots,
) -> ObResult<Vec<Order>> {
    nodes
        .iter()
        .enumerate()
        .filter_map(|(slot, node)| node.as_leaf().map(|leaf| (slot as NodeHandle, leaf)))
        .map(|(slot, leaf)| {
            let peg_offset = pegged.binary_search(&slot).is_ok().then(|| leaf.peg_offset());
            let float_price = match peg_offset {
                Some(offset) => peg_offset_to_decimal(offset, lots)?,
                None => lots.price_to_decimal(leaf.price())?,
            };
            Ok(Order {
                side,
                slot,
                order_id: leaf.order_id(),
                sequence_number: leaf.sequence_number(side),
                price: leaf.price(),
                quantity: leaf.quantity,
                float_price,
                float_quantity: lots.size_to_decimal(leaf.quantity)?,
                client_order_id: leaf.client_order_id,
                owner: leaf.owner,
                owner_slot: leaf.owner_slot,
                timestamp: leaf.timestamp,
                peg_offset,
            })
        })
        .collect()
}

/// Sorts best first: descending price for bids, ascending for asks. Equal prices
/// keep slot order.
fn sort_best_first(orders: &mut [Order], side: Side) {
    match side {
        Side::Bid => orders.sort_by_key(|o| Reverse(o.price)),
        Side::Ask => orders.sort_by_key(|o| o.price),
    }
}

/// One side of a market, decoded from a single slab account.
///
/// A book is an immutable snapshot. Refreshing a market decodes a new book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBook {
    side: Side,
    lots: MarketLots,
    header: SlabHeader,
    orders: Vec<Order>,
}

impl OrderBook {
    /// Decodes the raw account image of one book side.
    pub fn decode(
        buf: &[u8],
        layout: &VenueLayout,
        side: Side,
        lots: MarketLots,
    ) -> ObResult<Self> {
        let slab = Slab::from_buffer(buf, layout)?;
        Self::from_slab(&slab, side, lots)
    }

    pub fn from_slab(slab: &Slab, side: Side, lots: MarketLots) -> ObResult<Self> {
        lots.validate()?;
        if let Some(account_side) = slab.side {
            if account_side != side {
                return Err(OrderBookError::WrongAccountKind);
            }
        }
        let mut pegged = slab.pegged_leaves()?;
        pegged.sort_unstable();
        let orders = assemble_orders(&slab.nodes, &pegged, side, &lots)?;
        #[cfg(feature = "debug-asserts")]
        crate::utils::assert(
            orders.len() == slab.header.leaf_count as usize,
            OrderBookError::InvalidHeader("leaf count does not match the live leaves"),
        )?;
        Ok(Self {
            side,
            lots,
            header: slab.header,
            orders,
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn lots(&self) -> &MarketLots {
        &self.lots
    }

    pub fn header(&self) -> &SlabHeader {
        &self.header
    }

    /// Every live order, in slot order.
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Orders resting at a fixed price.
    pub fn fixed_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| !o.is_pegged())
    }

    /// Orders priced relative to an oracle. They have no price of their own until
    /// the oracle is read, and are left out of the price-ordered queries below.
    pub fn pegged_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| o.is_pegged())
    }

    /// A copy of the fixed-price orders sorted best first for `side`.
    pub fn sorted_orders(&self, side: Side) -> Vec<Order> {
        let mut orders = self.fixed_orders().cloned().collect::<Vec<_>>();
        sort_best_first(&mut orders, side);
        orders
    }

    /// The fixed-price order with the highest raw price.
    pub fn best_bid(&self) -> ObResult<Order> {
        self.sorted_orders(Side::Bid)
            .into_iter()
            .next()
            .ok_or(OrderBookError::EmptyBook)
    }

    /// The fixed-price order with the lowest raw price.
    pub fn best_ask(&self) -> ObResult<Order> {
        self.sorted_orders(Side::Ask)
            .into_iter()
            .next()
            .ok_or(OrderBookError::EmptyBook)
    }

    /// Best order for the side this book holds.
    pub fn best(&self) -> ObResult<Order> {
        match self.side {
            Side::Bid => self.best_bid(),
            Side::Ask => self.best_ask(),
        }
    }

    pub fn orders_for_owner<'a>(&'a self, owner: &'a Pubkey) -> impl Iterator<Item = &'a Order> {
        self.orders.iter().filter(move |o| &o.owner == owner)
    }

    /// Aggregates orders into at most `depth` price levels, best first.
    pub fn levels(&self, depth: usize) -> ObResult<Vec<PriceLevel>> {
        let mut levels: Vec<(u64, u64, usize)> = Vec::new();
        for order in self.sorted_orders(self.side) {
            if let Some(last) = levels.last_mut().filter(|l| l.0 == order.price) {
                last.1 = last
                    .1
                    .checked_add(order.quantity)
                    .ok_or(OrderBookError::NumericalOverflow)?;
                last.2 += 1;
                continue;
            }
            if levels.len() == depth {
                break;
            }
            levels.push((order.price, order.quantity, 1));
        }
        levels
            .into_iter()
            .map(|(price, quantity, order_count)| {
                Ok(PriceLevel {
                    price,
                    quantity,
                    float_price: self.lots.price_to_decimal(price)?,
                    float_quantity: self.lots.size_to_decimal(quantity)?,
                    order_count,
                })
            })
            .collect()
    }
}

/// Both sides of a market.
#[derive(Debug, Clone)]
pub struct MarketBook {
    pub bids: Arc<OrderBook>,
    pub asks: Arc<OrderBook>,
}

impl MarketBook {
    /// Best ask price minus best bid price.
    pub fn spread(&self) -> ObResult<Decimal> {
        let bid = self.bids.best_bid()?;
        let ask = self.asks.best_ask()?;
        ask.float_price
            .checked_sub(bid.float_price)
            .ok_or(OrderBookError::NumericalOverflow)
    }

    pub fn mid_price(&self) -> ObResult<Decimal> {
        let bid = self.bids.best_bid()?;
        let ask = self.asks.best_ask()?;
        ask.float_price
            .checked_add(bid.float_price)
            .and_then(|sum| sum.checked_div(Decimal::TWO))
            .ok_or(OrderBookError::NumericalOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::critbit::{FreeNode, InnerNode, SlabBuilder};
    use crate::venue::{MANGO_V3, OPENBOOK_V2, SERUM};
    use std::str::FromStr;

    const UNIT_LOTS: MarketLots = MarketLots {
        base_decimals: 0,
        quote_decimals: 0,
        base_lot_size: 1,
        quote_lot_size: 1,
    };

    fn scenario_buffer() -> Vec<u8> {
        let mut builder = SlabBuilder::new(&SERUM, Side::Bid).with_capacity(16);
        let owner = Pubkey::new_unique();
        builder.push_leaf(100, 1, owner, 5);
        builder.push(Node::Free(FreeNode { next: 3 }));
        builder.push_leaf(90, 2, owner, 7);
        let header = SlabHeader {
            bump_index: 3,
            free_list_len: 1,
            free_list_head: 2,
            root_node: 0,
            leaf_count: 2,
        };
        builder.with_header(header).build()
    }

    fn scenario_book() -> OrderBook {
        OrderBook::decode(&scenario_buffer(), &SERUM, Side::Bid, UNIT_LOTS).unwrap()
    }

    #[test]
    fn leaves_become_orders() {
        let book = scenario_book();
        assert_eq!(book.orders().len(), 2);
        assert_eq!(book.orders().len(), book.header().leaf_count as usize);
        assert_eq!(book.best_bid().unwrap().price, 100);
        assert_eq!(book.best().unwrap().price, 100);
        assert_eq!(book.best_ask().unwrap().price, 90);
        let order = &book.orders()[1];
        assert_eq!(order.slot, 2);
        assert_eq!(order.quantity, 7);
        assert_eq!(order.float_quantity, Decimal::from(7));
        assert_eq!(order.sequence_number, 2);
    }

    #[test]
    fn empty_book() {
        let buf = SlabBuilder::new(&MANGO_V3, Side::Ask).build();
        let book = OrderBook::decode(&buf, &MANGO_V3, Side::Ask, UNIT_LOTS).unwrap();
        assert!(book.is_empty());
        assert!(matches!(book.best_ask(), Err(OrderBookError::EmptyBook)));
        assert!(matches!(book.best_bid(), Err(OrderBookError::EmptyBook)));
        assert!(book.levels(10).unwrap().is_empty());
    }

    #[test]
    fn side_must_match_account() {
        let buf = SlabBuilder::new(&MANGO_V3, Side::Ask).build();
        assert!(matches!(
            OrderBook::decode(&buf, &MANGO_V3, Side::Bid, UNIT_LOTS),
            Err(OrderBookError::WrongAccountKind)
        ));
    }

    #[test]
    fn equal_prices_keep_slot_order() {
        let mut builder = SlabBuilder::new(&MANGO_V3, Side::Ask);
        let owner = Pubkey::new_unique();
        builder.push_leaf(50, 9, owner, 1);
        builder.push_leaf(50, 3, owner, 2);
        builder.push_leaf(60, 1, owner, 3);
        let book =
            OrderBook::decode(&builder.build(), &MANGO_V3, Side::Ask, UNIT_LOTS).unwrap();
        let best = book.best_ask().unwrap();
        assert_eq!(best.slot, 0);
        let sorted = book.sorted_orders(Side::Bid);
        assert_eq!(
            sorted.iter().map(|o| o.slot).collect::<Vec<_>>(),
            vec![2, 0, 1]
        );
    }

    #[test]
    fn levels_aggregate_best_first() {
        let lots = MarketLots {
            base_decimals: 9,
            quote_decimals: 6,
            base_lot_size: 100_000_000,
            quote_lot_size: 100,
        };
        let mut builder = SlabBuilder::new(&MANGO_V3, Side::Bid);
        let alice = Pubkey::new_unique();
        let bob = Pubkey::new_unique();
        builder.push_leaf(23_400, 1, alice, 10);
        builder.push_leaf(23_450, 2, bob, 5);
        builder.push_leaf(23_400, 3, bob, 15);
        builder.push_leaf(23_300, 4, alice, 1);
        let book = OrderBook::decode(&builder.build(), &MANGO_V3, Side::Bid, lots).unwrap();

        let levels = book.levels(2).unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].price, 23_450);
        assert_eq!(levels[0].float_price, Decimal::from_str("23.45").unwrap());
        assert_eq!(levels[1].quantity, 25);
        assert_eq!(levels[1].order_count, 2);
        assert_eq!(levels[1].float_quantity, Decimal::from_str("2.5").unwrap());

        assert_eq!(book.orders_for_owner(&alice).count(), 2);
        assert!(book.levels(0).unwrap().is_empty());
    }

    #[test]
    fn market_spread() {
        let owner = Pubkey::new_unique();
        let mut bids = SlabBuilder::new(&MANGO_V3, Side::Bid);
        bids.push_leaf(98, 1, owner, 1);
        bids.push_leaf(99, 2, owner, 1);
        let mut asks = SlabBuilder::new(&MANGO_V3, Side::Ask);
        asks.push_leaf(102, 3, owner, 1);
        asks.push_leaf(101, 4, owner, 1);
        let market = MarketBook {
            bids: Arc::new(
                OrderBook::decode(&bids.build(), &MANGO_V3, Side::Bid, UNIT_LOTS).unwrap(),
            ),
            asks: Arc::new(
                OrderBook::decode(&asks.build(), &MANGO_V3, Side::Ask, UNIT_LOTS).unwrap(),
            ),
        };
        assert_eq!(market.spread().unwrap(), Decimal::from(2));
        assert_eq!(market.mid_price().unwrap(), Decimal::from(100));
    }

    #[test]
    fn decoding_is_deterministic() {
        let buf = scenario_buffer();
        let a = OrderBook::decode(&buf, &SERUM, Side::Bid, UNIT_LOTS).unwrap();
        let b = OrderBook::decode(&buf, &SERUM, Side::Bid, UNIT_LOTS).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn pegged_orders_stay_out_of_price_queries() {
        let owner = Pubkey::new_unique();
        let mut builder = SlabBuilder::new(&OPENBOOK_V2, Side::Bid);
        builder.push_leaf(100, 1, owner, 4);
        builder.push_pegged_leaf(-2, 2, owner, 3);
        builder.push_leaf(99, 3, owner, 1);
        builder.push_pegged_leaf(7, 4, owner, 2);
        builder.push(Node::Inner(InnerNode {
            prefix_len: 0,
            key: 0,
            children: [1, 3],
        }));
        let buf = builder.with_pegged_tree(4, 2).build();
        let book = OrderBook::decode(&buf, &OPENBOOK_V2, Side::Bid, UNIT_LOTS).unwrap();

        assert_eq!(book.orders().len(), 4);
        assert_eq!(book.orders().len(), book.header().leaf_count as usize);
        let best = book.best_bid().unwrap();
        assert_eq!(best.price, 100);
        assert!(!best.is_pegged());
        assert_eq!(book.best_ask().unwrap().price, 99);

        let pegged = book.pegged_orders().collect::<Vec<_>>();
        assert_eq!(pegged.len(), 2);
        assert_eq!(pegged[0].peg_offset, Some(-2));
        assert_eq!(pegged[0].float_price, Decimal::from(-2));
        assert_eq!(pegged[0].sequence_number, 2);
        assert_eq!(pegged[1].peg_offset, Some(7));

        let levels = book.levels(10).unwrap();
        assert_eq!(
            levels.iter().map(|l| (l.price, l.quantity)).collect::<Vec<_>>(),
            vec![(100, 4), (99, 1)]
        );
        assert_eq!(book.sorted_orders(Side::Bid).len(), 2);
    }
}
