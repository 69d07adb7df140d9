// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The resource model: fixed-point quantities and resource sets.

use std::collections::BTreeMap;
use std::fmt;

use crate::constants::RESOURCE_UNIT_SCALING;

/// Fixed-point representation for fractional resource quantities.
///
/// Quantities can be fractional (half a CPU). The value is stored as
/// `value * RESOURCE_UNIT_SCALING` so arithmetic stays exact.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedPoint(i64);

impl FixedPoint {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(RESOURCE_UNIT_SCALING as i64);

    pub fn from_f64(value: f64) -> Self {
        Self((value * RESOURCE_UNIT_SCALING as f64).round() as i64)
    }

    /// From the raw scaled integer representation.
    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / RESOURCE_UNIT_SCALING as f64
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl std::ops::Add for FixedPoint {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for FixedPoint {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for FixedPoint {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl std::ops::SubAssign for FixedPoint {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl std::ops::Neg for FixedPoint {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Debug for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedPoint({})", self.to_f64())
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

/// A set of named resources with fixed-point quantities.
///
/// Resources are kept in an ordered map so iteration order (and hence
/// rendering and hashing of derived state) is deterministic across nodes.
/// Zero-quantity entries are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSet {
    resources: BTreeMap<String, FixedPoint>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// From a map of resource name to float quantity; non-positive entries
    /// are ignored.
    pub fn from_map(map: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            resources: map
                .into_iter()
                .filter(|(_, v)| *v > 0.0)
                .map(|(k, v)| (k, FixedPoint::from_f64(v)))
                .collect(),
        }
    }

    pub fn get(&self, resource: &str) -> FixedPoint {
        self.resources
            .get(resource)
            .copied()
            .unwrap_or(FixedPoint::ZERO)
    }

    pub fn set(&mut self, resource: String, value: FixedPoint) {
        if value.is_zero() {
            self.resources.remove(&resource);
        } else {
            self.resources.insert(resource, value);
        }
    }

    /// Add every quantity of `other` into this set.
    pub fn add(&mut self, other: &ResourceSet) {
        for (name, amount) in &other.resources {
            let entry = self
                .resources
                .entry(name.clone())
                .or_insert(FixedPoint::ZERO);
            *entry += *amount;
        }
    }

    /// Subtract the quantities of `other`; entries never go below zero.
    pub fn subtract(&mut self, other: &ResourceSet) {
        for (name, amount) in &other.resources {
            if let Some(entry) = self.resources.get_mut(name) {
                *entry -= *amount;
                if !entry.is_positive() {
                    self.resources.remove(name);
                }
            }
        }
    }

    /// Whether this set covers `other` pointwise.
    pub fn is_superset_of(&self, other: &ResourceSet) -> bool {
        other
            .resources
            .iter()
            .all(|(name, amount)| self.get(name) >= *amount)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Iterate (name, quantity) in deterministic name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, FixedPoint)> {
        self.resources.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.resources
            .iter()
            .map(|(k, v)| (k.clone(), v.to_f64()))
            .collect()
    }
}
