//! Byte layouts of the slab accounts of each supported exchange program.
//!
//! Every venue encodes the same tagged-node slab. Only byte widths and field
//! offsets differ, so the decoder is driven entirely by a [`VenueLayout`].
//! Node field offsets are relative to the start of the node, tag included.
use serde::{Deserialize, Serialize};

/// Width of the tag at the start of every node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagWidth {
    U8,
    U32,
}

impl TagWidth {
    pub const fn len(self) -> usize {
        match self {
            TagWidth::U8 => 1,
            TagWidth::U32 => 4,
        }
    }
}

/// A small integer leaf field whose width varies between venues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmallField {
    U8(usize),
    U16(usize),
}

/// How many node slots the node region holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeCapacity {
    /// The node array has a fixed length.
    Fixed(u32),
    /// The node array fills the account, minus the trailing padding.
    AccountLength,
}

/// How an account declares which side of the book it stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountKindMarker {
    None,
    /// Serum-style [`AccountFlag`][`crate::state::AccountFlag`] bitset, stored as a `u64`.
    AccountFlags { offset: usize },
    /// A single data-type byte.
    DataType { offset: usize, bids: u8, asks: u8 },
}

/// Absolute offsets of the slab header fields. All are little-endian `u32`s,
/// the low half is read where the venue stores a `u64`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderLayout {
    pub bump_index: usize,
    pub free_list_len: usize,
    pub free_list_head: usize,
    pub root: usize,
    pub leaf_count: usize,
    /// Second tree sharing the node region, holding oracle-pegged orders
    pub pegged_tree: Option<TreeRootLayout>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeRootLayout {
    pub root: usize,
    pub leaf_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InnerLayout {
    pub prefix_len: usize,
    pub key: usize,
    pub children: [usize; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeLayout {
    pub next: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeafLayout {
    pub owner_slot: usize,
    pub order_type: Option<usize>,
    pub version: Option<usize>,
    pub time_in_force: Option<SmallField>,
    pub key: usize,
    pub owner: usize,
    pub quantity: usize,
    pub client_order_id: usize,
    pub peg_limit: Option<usize>,
    pub timestamp: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VenueLayout {
    pub name: &'static str,
    /// Magic bytes at the start of the account.
    pub head_padding: &'static [u8],
    /// Magic bytes at the end of the account.
    pub tail_padding: &'static [u8],
    pub account_kind: AccountKindMarker,
    pub header: HeaderLayout,
    pub node_region_offset: usize,
    pub node_width: usize,
    pub capacity: NodeCapacity,
    pub tag_width: TagWidth,
    pub inner: InnerLayout,
    pub free: FreeLayout,
    pub leaf: LeafLayout,
}

impl VenueLayout {
    /// Size in bytes of an account holding `capacity` nodes.
    pub fn account_len(&self, capacity: u32) -> usize {
        self.node_region_offset + capacity as usize * self.node_width + self.tail_padding.len()
    }
}

const SERUM_LEAF: LeafLayout = LeafLayout {
    owner_slot: 4,
    order_type: None,
    version: None,
    time_in_force: None,
    key: 8,
    owner: 24,
    quantity: 56,
    client_order_id: 64,
    peg_limit: None,
    timestamp: None,
};

const TREE_INNER: InnerLayout = InnerLayout {
    prefix_len: 4,
    key: 8,
    children: [24, 28],
};

const TREE_FREE: FreeLayout = FreeLayout { next: 4 };

pub const SERUM: VenueLayout = VenueLayout {
    name: "serum",
    head_padding: b"serum",
    tail_padding: b"padding",
    account_kind: AccountKindMarker::AccountFlags { offset: 5 },
    header: HeaderLayout {
        bump_index: 13,
        free_list_len: 21,
        free_list_head: 29,
        root: 33,
        leaf_count: 37,
        pegged_tree: None,
    },
    node_region_offset: 45,
    node_width: 72,
    capacity: NodeCapacity::AccountLength,
    tag_width: TagWidth::U32,
    inner: TREE_INNER,
    free: TREE_FREE,
    leaf: SERUM_LEAF,
};

/// Zeta runs a fork of the Serum dex and keeps its slab layout.
pub const ZETA: VenueLayout = VenueLayout {
    name: "zeta",
    ..SERUM
};

pub const MANGO_V3: VenueLayout = VenueLayout {
    name: "mango-v3",
    head_padding: &[],
    tail_padding: &[],
    account_kind: AccountKindMarker::DataType {
        offset: 0,
        bids: 5,
        asks: 6,
    },
    header: HeaderLayout {
        bump_index: 8,
        free_list_len: 16,
        free_list_head: 24,
        root: 28,
        leaf_count: 32,
        pegged_tree: None,
    },
    node_region_offset: 40,
    node_width: 88,
    capacity: NodeCapacity::Fixed(1024),
    tag_width: TagWidth::U32,
    inner: TREE_INNER,
    free: TREE_FREE,
    leaf: LeafLayout {
        owner_slot: 4,
        order_type: Some(5),
        version: Some(6),
        time_in_force: Some(SmallField::U8(7)),
        key: 8,
        owner: 24,
        quantity: 56,
        client_order_id: 64,
        peg_limit: Some(72),
        timestamp: Some(80),
    },
};

/// The fixed and oracle-pegged trees share one node region. The header root
/// and leaf count describe the fixed tree.
pub const OPENBOOK_V2: VenueLayout = VenueLayout {
    name: "openbook-v2",
    head_padding: &[],
    tail_padding: &[],
    account_kind: AccountKindMarker::None,
    header: HeaderLayout {
        bump_index: 316,
        free_list_len: 320,
        free_list_head: 324,
        root: 8,
        leaf_count: 12,
        pegged_tree: Some(TreeRootLayout {
            root: 16,
            leaf_count: 20,
        }),
    },
    node_region_offset: 840,
    node_width: 88,
    capacity: NodeCapacity::Fixed(1024),
    tag_width: TagWidth::U8,
    inner: TREE_INNER,
    free: TREE_FREE,
    leaf: LeafLayout {
        owner_slot: 1,
        order_type: None,
        version: None,
        time_in_force: Some(SmallField::U16(2)),
        key: 8,
        owner: 24,
        quantity: 56,
        client_order_id: 80,
        peg_limit: Some(72),
        timestamp: Some(64),
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    #[serde(rename = "serum")]
    Serum,
    #[serde(rename = "zeta")]
    Zeta,
    #[serde(rename = "mango-v3")]
    MangoV3,
    #[serde(rename = "openbook-v2")]
    OpenBookV2,
}

impl Venue {
    pub fn layout(&self) -> &'static VenueLayout {
        match self {
            Venue::Serum => &SERUM,
            Venue::Zeta => &ZETA,
            Venue::MangoV3 => &MANGO_V3,
            Venue::OpenBookV2 => &OPENBOOK_V2,
        }
    }
}
