// IP Address Interval Algebra
//
// Pools are sorted lists of disjoint inclusive ranges over one address family.
// All operations are pure: they return a new pool and never fail for addresses
// outside the pool (those are ignored).

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Address family of a range or pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    fn bits(self) -> u32 {
        match self {
            Family::V4 => 32,
            Family::V6 => 128,
        }
    }
}

fn to_bits(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u32::from(*v4) as u128,
        IpAddr::V6(v6) => u128::from(*v6),
    }
}

fn from_bits(family: Family, value: u128) -> IpAddr {
    match family {
        Family::V4 => IpAddr::V4(Ipv4Addr::from(value as u32)),
        Family::V6 => IpAddr::V6(Ipv6Addr::from(value)),
    }
}

/// Inclusive address range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct IpRange {
    start: IpAddr,
    end: IpAddr,
}

/// Unchecked wire form; deserialization goes through `IpRange::new`
#[derive(Deserialize)]
struct RawRange {
    start: IpAddr,
    end: IpAddr,
}

impl TryFrom<RawRange> for IpRange {
    type Error = DomainError;

    fn try_from(raw: RawRange) -> Result<Self> {
        IpRange::new(raw.start, raw.end)
    }
}

impl IpRange {
    pub fn new(start: IpAddr, end: IpAddr) -> Result<Self> {
        if Family::of(&start) != Family::of(&end) {
            return Err(DomainError::InvalidRange(format!(
                "{}-{} mixes address families",
                start, end
            )));
        }
        if to_bits(&start) > to_bits(&end) {
            return Err(DomainError::InvalidRange(format!(
                "{}-{} has start after end",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single(addr: IpAddr) -> Self {
        Self {
            start: addr,
            end: addr,
        }
    }

    fn from_bounds(family: Family, start: u128, end: u128) -> Self {
        Self {
            start: from_bits(family, start),
            end: from_bits(family, end),
        }
    }

    pub fn start(&self) -> IpAddr {
        self.start
    }

    pub fn end(&self) -> IpAddr {
        self.end
    }

    pub fn family(&self) -> Family {
        Family::of(&self.start)
    }

    fn bounds(&self) -> (u128, u128) {
        (to_bits(&self.start), to_bits(&self.end))
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        if Family::of(addr) != self.family() {
            return false;
        }
        let (lo, hi) = self.bounds();
        let a = to_bits(addr);
        lo <= a && a <= hi
    }

    /// Number of addresses (saturates for the full IPv6 space)
    pub fn len(&self) -> u128 {
        let (lo, hi) = self.bounds();
        (hi - lo).saturating_add(1)
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    /// Iterate addresses in order. Each call starts from the beginning.
    pub fn addresses(&self) -> IpRangeIter {
        let (lo, hi) = self.bounds();
        IpRangeIter {
            family: self.family(),
            next: Some(lo),
            end: hi,
        }
    }

    pub fn intersects(&self, other: &IpRange) -> bool {
        if self.family() != other.family() {
            return false;
        }
        let (a_lo, a_hi) = self.bounds();
        let (b_lo, b_hi) = other.bounds();
        a_lo <= b_hi && b_lo <= a_hi
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for IpRange {
    type Err = DomainError;

    /// Accepts `a.b.c.d-e.f.g.h` or a single address
    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim()
                .parse::<IpAddr>()
                .map_err(|_| DomainError::InvalidAddress(part.trim().to_string()))
        };
        match s.split_once('-') {
            Some((start, end)) => IpRange::new(parse(start)?, parse(end)?),
            None => Ok(IpRange::single(parse(s)?)),
        }
    }
}

/// Restartable, finite address iterator over one range
#[derive(Debug, Clone)]
pub struct IpRangeIter {
    family: Family,
    next: Option<u128>,
    end: u128,
}

impl Iterator for IpRangeIter {
    type Item = IpAddr;

    fn next(&mut self) -> Option<IpAddr> {
        let current = self.next?;
        if current > self.end {
            self.next = None;
            return None;
        }
        self.next = if current == self.end {
            None
        } else {
            current.checked_add(1)
        };
        Some(from_bits(self.family, current))
    }
}

/// CIDR block bounding a pool (e.g. a gateway subnet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSubnet")]
pub struct Subnet {
    network: IpAddr,
    prefix_len: u8,
}

#[derive(Deserialize)]
struct RawSubnet {
    network: IpAddr,
    prefix_len: u8,
}

impl TryFrom<RawSubnet> for Subnet {
    type Error = DomainError;

    fn try_from(raw: RawSubnet) -> Result<Self> {
        Subnet::new(raw.network, raw.prefix_len)
    }
}

impl Subnet {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        let family = Family::of(&addr);
        if u32::from(prefix_len) > family.bits() {
            return Err(DomainError::InvalidRange(format!(
                "prefix /{} too long for {}",
                prefix_len, addr
            )));
        }
        let network = from_bits(family, to_bits(&addr) & !Self::host_mask(family, prefix_len));
        Ok(Self {
            network,
            prefix_len,
        })
    }

    fn host_mask(family: Family, prefix_len: u8) -> u128 {
        let host_bits = family.bits() - u32::from(prefix_len);
        if host_bits >= 128 {
            u128::MAX
        } else {
            (1u128 << host_bits) - 1
        }
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Every address in the block, network and broadcast included
    pub fn range(&self) -> IpRange {
        let family = Family::of(&self.network);
        let lo = to_bits(&self.network);
        let hi = lo | Self::host_mask(family, self.prefix_len);
        IpRange::from_bounds(family, lo, hi)
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.range().contains(addr)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Subnet {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| DomainError::InvalidRange(format!("{} is not in CIDR form", s)))?;
        let addr: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| DomainError::InvalidAddress(addr.trim().to_string()))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|_| DomainError::InvalidRange(format!("bad prefix length in {}", s)))?;
        Subnet::new(addr, prefix)
    }
}

/// Sorted, disjoint, coalesced set of ranges of one family
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPool")]
pub struct IpPool {
    ranges: Vec<IpRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subnet: Option<Subnet>,
}

/// Stored pools are checked, not silently re-coalesced
#[derive(Deserialize)]
struct RawPool {
    ranges: Vec<IpRange>,
    #[serde(default)]
    subnet: Option<Subnet>,
}

impl TryFrom<RawPool> for IpPool {
    type Error = DomainError;

    fn try_from(raw: RawPool) -> Result<Self> {
        let pool = IpPool {
            ranges: raw.ranges,
            subnet: raw.subnet,
        };
        pool.validate()?;
        Ok(pool)
    }
}

impl IpPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty pool whose additions are confined to `subnet`
    pub fn within(subnet: Subnet) -> Self {
        Self {
            ranges: Vec::new(),
            subnet: Some(subnet),
        }
    }

    /// Build from arbitrary ranges; overlapping/adjacent input is coalesced
    pub fn from_ranges(ranges: impl IntoIterator<Item = IpRange>) -> Result<Self> {
        let ranges: Vec<IpRange> = ranges.into_iter().collect();
        let family = match ranges.first() {
            Some(r) => r.family(),
            None => return Ok(Self::new()),
        };
        if ranges.iter().any(|r| r.family() != family) {
            return Err(DomainError::InvalidRange(
                "pool ranges mix address families".to_string(),
            ));
        }
        let bounds = ranges.iter().map(IpRange::bounds).collect();
        Ok(Self {
            ranges: normalize(family, bounds),
            subnet: None,
        })
    }

    pub fn subnet(&self) -> Option<Subnet> {
        self.subnet
    }

    pub fn ranges(&self) -> &[IpRange] {
        &self.ranges
    }

    pub fn family(&self) -> Option<Family> {
        self.ranges
            .first()
            .map(IpRange::family)
            .or_else(|| self.subnet.map(|s| Family::of(&s.network)))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total number of addresses
    pub fn len(&self) -> u128 {
        self.ranges
            .iter()
            .fold(0u128, |acc, r| acc.saturating_add(r.len()))
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.ranges.iter().any(|r| r.contains(addr))
    }

    /// Remove addresses. Interior addresses split their range in two, boundary
    /// addresses shrink it, single-address ranges disappear.
    pub fn subtract(&self, addrs: &[IpAddr]) -> IpPool {
        let Some(family) = self.family() else {
            return self.clone();
        };
        let mut targets: Vec<u128> = addrs
            .iter()
            .filter(|a| Family::of(a) == family)
            .map(to_bits)
            .collect();
        targets.sort_unstable();
        targets.dedup();

        let mut bounds: Vec<(u128, u128)> = self.ranges.iter().map(IpRange::bounds).collect();
        for a in targets {
            let Some(idx) = bounds.iter().position(|&(lo, hi)| lo <= a && a <= hi) else {
                continue;
            };
            let (lo, hi) = bounds[idx];
            if lo == hi {
                bounds.remove(idx);
            } else if a == lo {
                bounds[idx].0 = lo + 1;
            } else if a == hi {
                bounds[idx].1 = hi - 1;
            } else {
                bounds[idx].1 = a - 1;
                bounds.insert(idx + 1, (a + 1, hi));
            }
        }

        let pool = IpPool {
            ranges: normalize(family, bounds),
            subnet: self.subnet,
        };
        debug_assert!(pool.validate().is_ok());
        pool
    }

    /// Add addresses, extending adjacent ranges or inserting singletons.
    /// Addresses of another family or outside the pool's subnet are ignored.
    pub fn add(&self, addrs: &[IpAddr]) -> IpPool {
        let family = match self.family().or_else(|| addrs.first().map(Family::of)) {
            Some(f) => f,
            None => return self.clone(),
        };
        let mut bounds: Vec<(u128, u128)> = self.ranges.iter().map(IpRange::bounds).collect();
        for addr in addrs {
            if Family::of(addr) != family {
                continue;
            }
            if let Some(subnet) = &self.subnet {
                if !subnet.contains(addr) {
                    continue;
                }
            }
            let a = to_bits(addr);
            bounds.push((a, a));
        }

        let pool = IpPool {
            ranges: normalize(family, bounds),
            subnet: self.subnet,
        };
        debug_assert!(pool.validate().is_ok());
        pool
    }

    /// Move `addrs` from `src` to `dst`. Only addresses owned by `src` and not
    /// already in `dst` move; returns the new pools and the moved addresses.
    pub fn reallocate(src: &IpPool, dst: &IpPool, addrs: &[IpAddr]) -> (IpPool, IpPool, Vec<IpAddr>) {
        let mut moved: Vec<IpAddr> = addrs
            .iter()
            .copied()
            .filter(|a| src.contains(a) && !dst.contains(a))
            .filter(|a| dst.subnet.map_or(true, |s| s.contains(a)))
            .collect();
        moved.sort_by_key(to_bits);
        moved.dedup();
        (src.subtract(&moved), dst.add(&moved), moved)
    }

    /// Check the disjointness invariant
    pub fn validate(&self) -> Result<()> {
        for window in self.ranges.windows(2) {
            let (prev, next) = (&window[0], &window[1]);
            if prev.family() != next.family() {
                return Err(DomainError::IntervalViolation(format!(
                    "mixed families: {} and {}",
                    prev, next
                )));
            }
            if prev.intersects(next) || prev.bounds().1 >= next.bounds().0 {
                return Err(DomainError::IntervalViolation(format!(
                    "{} overlaps or precedes {}",
                    next, prev
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for IpPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.ranges.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

/// Carve `range` around `excluded` addresses (e.g. statically bound IPs when
/// building a DHCP pool). Start/end exclusions shrink the range, interior ones
/// split it; empty pieces are dropped. Input order does not matter.
pub fn split_excluding(range: &IpRange, excluded: &[IpAddr]) -> Vec<IpRange> {
    let family = range.family();
    let (lo, hi) = range.bounds();

    let mut cuts: Vec<u128> = excluded
        .iter()
        .filter(|a| range.contains(a))
        .map(to_bits)
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut pieces = Vec::new();
    let mut cursor = Some(lo);
    for cut in cuts {
        let Some(start) = cursor else { break };
        if cut > start {
            pieces.push(IpRange::from_bounds(family, start, cut - 1));
        }
        cursor = cut.checked_add(1);
    }
    if let Some(start) = cursor {
        if start <= hi {
            pieces.push(IpRange::from_bounds(family, start, hi));
        }
    }
    pieces
}

fn normalize(family: Family, mut bounds: Vec<(u128, u128)>) -> Vec<IpRange> {
    bounds.sort_unstable();
    let mut merged: Vec<(u128, u128)> = Vec::with_capacity(bounds.len());
    for (lo, hi) in bounds {
        match merged.last_mut() {
            Some(last) if lo <= last.1.saturating_add(1) => {
                last.1 = last.1.max(hi);
            }
            _ => merged.push((lo, hi)),
        }
    }
    merged
        .into_iter()
        .map(|(lo, hi)| IpRange::from_bounds(family, lo, hi))
        .collect()
}
