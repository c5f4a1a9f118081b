use num_enum::{IntoPrimitive, TryFromPrimitive};
use solana_program::pubkey::Pubkey;
use tracing::trace;

use crate::error::{ObResult, OrderBookError};
use crate::state::{AccountFlag, Side};
use crate::utils::{
    check_len, read_array, read_u128, read_u16, read_u32, read_u64, read_u8, write_bytes,
};
use crate::venue::{AccountKindMarker, NodeCapacity, SmallField, TagWidth, VenueLayout};
// A Slab contains the data for a slab header and an array of nodes of a critbit tree
// whose leafs contain the data referencing an order of the orderbook.

////////////////////////////////////
// Nodes

pub type NodeHandle = u32;

/// Added to the price offset of oracle-pegged orders so that keys stay unsigned.
pub const PEG_PRICE_BIAS: u64 = 1 << 63;

#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum NodeTag {
    Uninitialized = 0,
    Inner = 1,
    Leaf = 2,
    Free = 3,
    LastFree = 4,
}

#[derive(Debug, Clone, Copy)]
pub struct InnerNode {
    /// Number of leading key bits shared by every leaf below this node
    pub prefix_len: u32,
    /// Only the `prefix_len` high bits are meaningful
    pub key: u128,
    pub children: [NodeHandle; 2],
}

impl InnerNode {
    /// The key with every bit past `prefix_len` cleared.
    pub fn key_prefix(&self) -> u128 {
        match self.prefix_len {
            0 => 0,
            n if n >= 128 => self.key,
            n => self.key & !(u128::MAX >> n),
        }
    }

    /// The meaningful high-order bytes of the key, `ceil(prefix_len / 8)` of them.
    pub fn key_prefix_bytes(&self) -> Vec<u8> {
        let len = ((self.prefix_len.min(128) + 7) / 8) as usize;
        self.key_prefix().to_be_bytes()[..len].to_vec()
    }

    pub fn walk_down(&self, search_key: u128) -> (NodeHandle, bool) {
        let crit_bit_mask = (1u128 << 127) >> self.prefix_len.min(127);
        let crit_bit = (search_key & crit_bit_mask) != 0;
        (self.children[crit_bit as usize], crit_bit)
    }
}

// Bits past the prefix are leftovers from whichever leaf created the node.
impl PartialEq for InnerNode {
    fn eq(&self, other: &Self) -> bool {
        self.prefix_len == other.prefix_len
            && self.key_prefix() == other.key_prefix()
            && self.children == other.children
    }
}

impl Eq for InnerNode {}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct LeafNode {
    pub owner_slot: u8,
    pub order_type: u8,
    pub version: u8,
    pub time_in_force: u16,
    /// Price in the high 64 bits, sequence number in the low 64 bits
    pub key: u128,
    pub owner: Pubkey,
    pub quantity: u64,
    pub client_order_id: u64,
    /// Best initial price on Mango v3, peg limit on OpenBook v2
    pub peg_limit: u64,
    pub timestamp: u64,
}

impl LeafNode {
    pub fn new(key: u128, owner: Pubkey, quantity: u64, client_order_id: u64) -> Self {
        Self {
            owner_slot: 0,
            order_type: 0,
            version: 0,
            time_in_force: 0,
            key,
            owner,
            quantity,
            client_order_id,
            peg_limit: 0,
            timestamp: 0,
        }
    }

    /// Bids store the sequence number inverted, so that the older of two orders
    /// at the same price has the larger key.
    pub fn make_key(side: Side, price: u64, sequence_number: u64) -> u128 {
        let seq = match side {
            Side::Bid => !sequence_number,
            Side::Ask => sequence_number,
        };
        ((price as u128) << 64) | seq as u128
    }

    /// Key of an oracle-pegged order, whose price field holds a biased offset.
    pub fn make_pegged_key(side: Side, price_offset: i64, sequence_number: u64) -> u128 {
        Self::make_key(
            side,
            (price_offset as u64).wrapping_add(PEG_PRICE_BIAS),
            sequence_number,
        )
    }

    /// Parse a leaf node's price
    pub fn price(&self) -> u64 {
        (self.key >> 64) as u64
    }

    /// Offset from the oracle price, for leaves of a pegged tree.
    pub fn peg_offset(&self) -> i64 {
        self.price().wrapping_sub(PEG_PRICE_BIAS) as i64
    }

    pub fn sequence_number(&self, side: Side) -> u64 {
        match side {
            Side::Bid => !(self.key as u64),
            Side::Ask => self.key as u64,
        }
    }

    /// Get the associated order id
    pub fn order_id(&self) -> u128 {
        self.key
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct FreeNode {
    pub next: NodeHandle,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Node {
    Uninitialized,
    Inner(InnerNode),
    Leaf(LeafNode),
    Free(FreeNode),
    LastFree(FreeNode),
}

fn malformed(slot: NodeHandle, required: usize, actual: usize) -> OrderBookError {
    OrderBookError::MalformedNode {
        slot,
        required,
        actual,
    }
}

impl Node {
    /// Decodes the node stored at `slot`. `buffer` must hold at least one node.
    pub fn deserialize(buffer: &[u8], layout: &VenueLayout, slot: NodeHandle) -> ObResult<Self> {
        if buffer.len() < layout.node_width {
            return Err(malformed(slot, layout.node_width, buffer.len()));
        }
        let buffer = &buffer[..layout.node_width];
        let short = || malformed(slot, layout.node_width, buffer.len());
        let raw_tag = match layout.tag_width {
            TagWidth::U8 => read_u8(buffer, 0).map(u32::from),
            TagWidth::U32 => read_u32(buffer, 0),
        }
        .ok_or_else(short)?;
        let tag = NodeTag::try_from(raw_tag)
            .map_err(|_| OrderBookError::UnknownTag { slot, tag: raw_tag })?;

        let node = match tag {
            NodeTag::Uninitialized => Node::Uninitialized,
            NodeTag::Inner => {
                let l = &layout.inner;
                Node::Inner(InnerNode {
                    prefix_len: read_u32(buffer, l.prefix_len).ok_or_else(short)?,
                    key: read_u128(buffer, l.key).ok_or_else(short)?,
                    children: [
                        read_u32(buffer, l.children[0]).ok_or_else(short)?,
                        read_u32(buffer, l.children[1]).ok_or_else(short)?,
                    ],
                })
            }
            NodeTag::Leaf => Node::Leaf(LeafNode::deserialize(buffer, layout).ok_or_else(short)?),
            NodeTag::Free | NodeTag::LastFree => {
                let free = FreeNode {
                    next: read_u32(buffer, layout.free.next).ok_or_else(short)?,
                };
                if tag == NodeTag::Free {
                    Node::Free(free)
                } else {
                    Node::LastFree(free)
                }
            }
        };
        Ok(node)
    }

    /// Writes the node into `buffer`, which must be at least one node wide.
    pub fn serialize(&self, buffer: &mut [u8], layout: &VenueLayout) {
        let buffer = &mut buffer[..layout.node_width];
        buffer.iter_mut().for_each(|b| *b = 0);
        let tag = u32::from(self.tag());
        match layout.tag_width {
            TagWidth::U8 => buffer[0] = tag as u8,
            TagWidth::U32 => write_bytes(buffer, 0, &tag.to_le_bytes()),
        }
        match self {
            Node::Uninitialized => {}
            Node::Inner(n) => {
                let l = &layout.inner;
                write_bytes(buffer, l.prefix_len, &n.prefix_len.to_le_bytes());
                write_bytes(buffer, l.key, &n.key.to_le_bytes());
                write_bytes(buffer, l.children[0], &n.children[0].to_le_bytes());
                write_bytes(buffer, l.children[1], &n.children[1].to_le_bytes());
            }
            Node::Leaf(n) => n.serialize(buffer, layout),
            Node::Free(n) | Node::LastFree(n) => {
                write_bytes(buffer, layout.free.next, &n.next.to_le_bytes())
            }
        }
    }

    pub fn tag(&self) -> NodeTag {
        match self {
            Node::Uninitialized => NodeTag::Uninitialized,
            Node::Inner(_) => NodeTag::Inner,
            Node::Leaf(_) => NodeTag::Leaf,
            Node::Free(_) => NodeTag::Free,
            Node::LastFree(_) => NodeTag::LastFree,
        }
    }

    pub fn key(&self) -> Option<u128> {
        match &self {
            Node::Inner(inner) => Some(inner.key),
            Node::Leaf(leaf) => Some(leaf.key),
            _ => None,
        }
    }

    pub fn children(&self) -> Option<&[u32; 2]> {
        match &self {
            Node::Inner(InnerNode { children, .. }) => Some(children),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match &self {
            Node::Leaf(leaf_ref) => Some(leaf_ref),
            _ => None,
        }
    }
}

impl LeafNode {
    fn deserialize(buf: &[u8], layout: &VenueLayout) -> Option<Self> {
        let l = &layout.leaf;
        let optional_u8 = |offset: Option<usize>| match offset {
            Some(o) => read_u8(buf, o),
            None => Some(0),
        };
        let optional_u64 = |offset: Option<usize>| match offset {
            Some(o) => read_u64(buf, o),
            None => Some(0),
        };
        let time_in_force: u16 = match l.time_in_force {
            Some(SmallField::U8(o)) => read_u8(buf, o)?.into(),
            Some(SmallField::U16(o)) => read_u16(buf, o)?,
            None => 0,
        };
        Some(Self {
            owner_slot: read_u8(buf, l.owner_slot)?,
            order_type: optional_u8(l.order_type)?,
            version: optional_u8(l.version)?,
            time_in_force,
            key: read_u128(buf, l.key)?,
            owner: Pubkey::new_from_array(read_array(buf, l.owner)?),
            quantity: read_u64(buf, l.quantity)?,
            client_order_id: read_u64(buf, l.client_order_id)?,
            peg_limit: optional_u64(l.peg_limit)?,
            timestamp: optional_u64(l.timestamp)?,
        })
    }

    // Fields the venue does not store are dropped.
    fn serialize(&self, buf: &mut [u8], layout: &VenueLayout) {
        let l = &layout.leaf;
        buf[l.owner_slot] = self.owner_slot;
        if let Some(o) = l.order_type {
            buf[o] = self.order_type;
        }
        if let Some(o) = l.version {
            buf[o] = self.version;
        }
        match l.time_in_force {
            Some(SmallField::U8(o)) => buf[o] = self.time_in_force as u8,
            Some(SmallField::U16(o)) => write_bytes(buf, o, &self.time_in_force.to_le_bytes()),
            None => {}
        }
        write_bytes(buf, l.key, &self.key.to_le_bytes());
        write_bytes(buf, l.owner, self.owner.as_ref());
        write_bytes(buf, l.quantity, &self.quantity.to_le_bytes());
        write_bytes(buf, l.client_order_id, &self.client_order_id.to_le_bytes());
        if let Some(o) = l.peg_limit {
            write_bytes(buf, o, &self.peg_limit.to_le_bytes());
        }
        if let Some(o) = l.timestamp {
            write_bytes(buf, o, &self.timestamp.to_le_bytes());
        }
    }
}

////////////////////////////////////
// Slabs

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabHeader {
    /// Slots at or past this index were never written
    pub bump_index: u32,
    pub free_list_len: u32,
    pub free_list_head: NodeHandle,
    pub root_node: NodeHandle,
    pub leaf_count: u32,
}

impl SlabHeader {
    fn deserialize(buf: &[u8], layout: &VenueLayout) -> ObResult<Self> {
        let h = &layout.header;
        let field = |offset: usize| {
            read_u32(buf, offset).ok_or(OrderBookError::TruncatedBuffer {
                required: offset + 4,
                actual: buf.len(),
            })
        };
        Ok(Self {
            bump_index: field(h.bump_index)?,
            free_list_len: field(h.free_list_len)?,
            free_list_head: field(h.free_list_head)?,
            root_node: field(h.root)?,
            leaf_count: field(h.leaf_count)?,
        })
    }

    fn serialize(&self, buf: &mut [u8], layout: &VenueLayout) {
        let h = &layout.header;
        write_bytes(buf, h.bump_index, &self.bump_index.to_le_bytes());
        write_bytes(buf, h.free_list_len, &self.free_list_len.to_le_bytes());
        write_bytes(buf, h.free_list_head, &self.free_list_head.to_le_bytes());
        write_bytes(buf, h.root, &self.root_node.to_le_bytes());
        write_bytes(buf, h.leaf_count, &self.leaf_count.to_le_bytes());
    }
}

/// Root of the oracle-pegged tree of a venue keeping two trees in one slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeRoot {
    pub root: NodeHandle,
    pub leaf_count: u32,
}

impl TreeRoot {
    fn deserialize(buf: &[u8], layout: &VenueLayout) -> ObResult<Option<Self>> {
        let tree = match layout.header.pegged_tree {
            Some(tree) => tree,
            None => return Ok(None),
        };
        let field = |offset: usize| {
            read_u32(buf, offset).ok_or(OrderBookError::TruncatedBuffer {
                required: offset + 4,
                actual: buf.len(),
            })
        };
        Ok(Some(Self {
            root: field(tree.root)?,
            leaf_count: field(tree.leaf_count)?,
        }))
    }
}

/// A decoded slab: its header and every node below the bump index, indexed by slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slab {
    pub header: SlabHeader,
    pub nodes: Vec<Node>,
    /// The side the account declares, when the venue marks it
    pub side: Option<Side>,
    pub pegged_tree: Option<TreeRoot>,
}

fn read_account_side(buf: &[u8], layout: &VenueLayout) -> ObResult<Option<Side>> {
    match layout.account_kind {
        AccountKindMarker::None => Ok(None),
        AccountKindMarker::AccountFlags { offset } => {
            let bits = read_u64(buf, offset).ok_or(OrderBookError::TruncatedBuffer {
                required: offset + 8,
                actual: buf.len(),
            })?;
            AccountFlag::side_from_bits(bits).map(Some)
        }
        AccountKindMarker::DataType { offset, bids, asks } => match read_u8(buf, offset) {
            Some(t) if t == bids => Ok(Some(Side::Bid)),
            Some(t) if t == asks => Ok(Some(Side::Ask)),
            _ => Err(OrderBookError::WrongAccountKind),
        },
    }
}

impl Slab {
    /// Decodes a full account image laid out as `layout`.
    ///
    /// Only the slots below the header's bump index are decoded. Decoding is all
    /// or nothing: any malformed node fails the whole call.
    pub fn from_buffer(buf: &[u8], layout: &VenueLayout) -> ObResult<Self> {
        check_len(buf, layout.node_region_offset)?;
        if !buf.starts_with(layout.head_padding) {
            return Err(OrderBookError::WrongAccountKind);
        }
        let side = read_account_side(buf, layout)?;
        let mut header = SlabHeader::deserialize(buf, layout)?;
        let pegged_tree = TreeRoot::deserialize(buf, layout)?;
        if let Some(pegged) = pegged_tree {
            header.leaf_count = header
                .leaf_count
                .checked_add(pegged.leaf_count)
                .ok_or(OrderBookError::InvalidHeader("leaf count overflows"))?;
        }

        let capacity = match layout.capacity {
            NodeCapacity::Fixed(capacity) => {
                check_len(buf, layout.account_len(capacity))?;
                if !buf.ends_with(layout.tail_padding) {
                    return Err(OrderBookError::WrongAccountKind);
                }
                capacity as usize
            }
            NodeCapacity::AccountLength => {
                // A cut account loses its trailing padding along with its last nodes.
                let body = buf.len() - layout.node_region_offset;
                if !buf.ends_with(layout.tail_padding) || body < layout.tail_padding.len() {
                    return Err(OrderBookError::TruncatedBuffer {
                        required: layout.account_len((body / layout.node_width) as u32 + 1),
                        actual: buf.len(),
                    });
                }
                (body - layout.tail_padding.len()) / layout.node_width
            }
        };
        let bump_index = header.bump_index as usize;
        if bump_index > capacity {
            return match layout.capacity {
                NodeCapacity::Fixed(_) => Err(OrderBookError::InvalidHeader(
                    "bump index exceeds the node capacity",
                )),
                NodeCapacity::AccountLength => Err(OrderBookError::TruncatedBuffer {
                    required: layout.account_len(header.bump_index),
                    actual: buf.len(),
                }),
            };
        }
        if header.leaf_count > header.bump_index {
            return Err(OrderBookError::InvalidHeader("leaf count exceeds bump index"));
        }

        let region = &buf[layout.node_region_offset..];
        let nodes = region
            .chunks(layout.node_width)
            .take(bump_index)
            .enumerate()
            .map(|(slot, bytes)| Node::deserialize(bytes, layout, slot as NodeHandle))
            .collect::<ObResult<Vec<_>>>()?;
        trace!(
            venue = layout.name,
            bump_index = header.bump_index,
            leaf_count = header.leaf_count,
            "decoded slab"
        );
        Ok(Self {
            header,
            nodes,
            side,
            pegged_tree,
        })
    }

    pub fn get_node(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.get(handle as usize)
    }

    /// Every live leaf, in slot order.
    pub fn leaves(&self) -> impl Iterator<Item = (NodeHandle, &LeafNode)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(slot, node)| node.as_leaf().map(|leaf| (slot as NodeHandle, leaf)))
    }

    /// Slots of the leaves below `root`, found by following inner node children.
    pub fn tree_leaves(&self, root: NodeHandle) -> ObResult<Vec<NodeHandle>> {
        let mut leaves = Vec::new();
        let mut stack = vec![root];
        let mut visited = 0usize;
        while let Some(handle) = stack.pop() {
            visited += 1;
            if visited > self.nodes.len() {
                return Err(OrderBookError::InvalidHeader("tree revisits a node"));
            }
            match self.get_node(handle) {
                Some(Node::Leaf(_)) => leaves.push(handle),
                Some(Node::Inner(inner)) => stack.extend_from_slice(&inner.children),
                _ => return Err(OrderBookError::InvalidHeader("tree reaches a free slot")),
            }
        }
        Ok(leaves)
    }

    /// Slots of the oracle-pegged leaves, empty for venues with a single tree.
    pub fn pegged_leaves(&self) -> ObResult<Vec<NodeHandle>> {
        match self.pegged_tree {
            Some(TreeRoot { root, leaf_count }) if leaf_count > 0 => self.tree_leaves(root),
            _ => Ok(Vec::new()),
        }
    }

    pub fn root(&self) -> Option<NodeHandle> {
        if self.header.leaf_count == 0 {
            None
        } else {
            Some(self.header.root_node)
        }
    }
}

/// Writes well-formed slab accounts, for fixtures and benchmarks.
#[derive(Debug, Clone)]
pub struct SlabBuilder {
    layout: &'static VenueLayout,
    side: Side,
    nodes: Vec<Node>,
    capacity: u32,
    header: Option<SlabHeader>,
    pegged_tree: Option<TreeRoot>,
}

impl SlabBuilder {
    pub fn new(layout: &'static VenueLayout, side: Side) -> Self {
        let capacity = match layout.capacity {
            NodeCapacity::Fixed(capacity) => capacity,
            NodeCapacity::AccountLength => 0,
        };
        Self {
            layout,
            side,
            nodes: Vec::new(),
            capacity,
            header: None,
            pegged_tree: None,
        }
    }

    /// Sets the node capacity of venues whose slab fills the account.
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        if self.layout.capacity == NodeCapacity::AccountLength {
            self.capacity = capacity;
        }
        self
    }

    /// Overrides the header derived from the pushed nodes.
    pub fn with_header(mut self, header: SlabHeader) -> Self {
        self.header = Some(header);
        self
    }

    /// Records the root of the oracle-pegged tree, on venues that have one.
    /// The header leaf count stays the total over both trees.
    pub fn with_pegged_tree(mut self, root: NodeHandle, leaf_count: u32) -> Self {
        self.pegged_tree = Some(TreeRoot { root, leaf_count });
        self
    }

    pub fn push(&mut self, node: Node) -> NodeHandle {
        self.nodes.push(node);
        (self.nodes.len() - 1) as NodeHandle
    }

    pub fn push_leaf(
        &mut self,
        price: u64,
        sequence_number: u64,
        owner: Pubkey,
        quantity: u64,
    ) -> NodeHandle {
        let key = LeafNode::make_key(self.side, price, sequence_number);
        self.push(Node::Leaf(LeafNode::new(key, owner, quantity, sequence_number)))
    }

    pub fn push_pegged_leaf(
        &mut self,
        price_offset: i64,
        sequence_number: u64,
        owner: Pubkey,
        quantity: u64,
    ) -> NodeHandle {
        let key = LeafNode::make_pegged_key(self.side, price_offset, sequence_number);
        self.push(Node::Leaf(LeafNode::new(key, owner, quantity, sequence_number)))
    }

    /// The header matching the pushed nodes: bump index past the last node, free
    /// list headed by the first free slot.
    pub fn derived_header(&self) -> SlabHeader {
        let free_slots = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n, Node::Free(_) | Node::LastFree(_)));
        SlabHeader {
            bump_index: self.nodes.len() as u32,
            free_list_len: free_slots.clone().count() as u32,
            free_list_head: free_slots.map(|(slot, _)| slot as u32).next().unwrap_or(0),
            root_node: 0,
            leaf_count: self.nodes.iter().filter(|n| n.as_leaf().is_some()).count() as u32,
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let layout = self.layout;
        let capacity = self.capacity.max(self.nodes.len() as u32);
        let mut buf = vec![0u8; layout.account_len(capacity)];
        write_bytes(&mut buf, 0, layout.head_padding);
        let tail_start = buf.len() - layout.tail_padding.len();
        write_bytes(&mut buf, tail_start, layout.tail_padding);
        match layout.account_kind {
            AccountKindMarker::None => {}
            AccountKindMarker::AccountFlags { offset } => write_bytes(
                &mut buf,
                offset,
                &AccountFlag::bits_for_side(self.side).to_le_bytes(),
            ),
            AccountKindMarker::DataType { offset, bids, asks } => {
                buf[offset] = match self.side {
                    Side::Bid => bids,
                    Side::Ask => asks,
                }
            }
        }
        let header = self.header.unwrap_or_else(|| self.derived_header());
        match (self.pegged_tree, layout.header.pegged_tree) {
            (Some(pegged), Some(tree)) => {
                let fixed = SlabHeader {
                    leaf_count: header.leaf_count.saturating_sub(pegged.leaf_count),
                    ..header
                };
                fixed.serialize(&mut buf, layout);
                write_bytes(&mut buf, tree.root, &pegged.root.to_le_bytes());
                write_bytes(&mut buf, tree.leaf_count, &pegged.leaf_count.to_le_bytes());
            }
            _ => header.serialize(&mut buf, layout),
        }
        for (slot, node) in self.nodes.iter().enumerate() {
            let offset = layout.node_region_offset + slot * layout.node_width;
            node.serialize(&mut buf[offset..], layout);
        }
        buf
    }
}
