// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::protocol::{PageInfo, SyncType};

fn response() -> SyncResponse {
    SyncResponse {
        items: vec![],
        pagination: PageInfo::last(),
        synchronization_type: SyncType::Full,
    }
}

#[tokio::test]
async fn resolved_value_reaches_the_receiver() {
    let mut slots = SlotMap::new();
    assert!(slots.open("Bill", 1));
    let rx = slots.take_receiver("Bill", 1).unwrap();

    slots.resolve("Bill", 1, Ok(response())).unwrap();

    assert_eq!(rx.await.unwrap().unwrap(), response());
    assert!(slots.all_resolved());
    assert!(slots.all_taken());
}

#[test]
fn second_resolution_is_rejected() {
    let mut slots = SlotMap::new();
    slots.open("Bill", 1);

    slots.resolve("Bill", 1, Ok(response())).unwrap();
    let err = slots.resolve("Bill", 1, Ok(response())).unwrap_err();

    assert!(matches!(err, Error::AlreadyResolved { page: 1, .. }));
    assert_eq!(slots.resolved(), 1);
}

#[test]
fn unknown_slot_cannot_be_resolved() {
    let mut slots = SlotMap::new();
    let err = slots.resolve("Bill", 2, Ok(response())).unwrap_err();
    assert!(matches!(err, Error::PageNotFound { page: 2, .. }));
}

#[test]
fn open_and_take_happen_once() {
    let mut slots = SlotMap::new();
    assert!(slots.open("Bill", 1));
    assert!(!slots.open("Bill", 1));
    assert!(!slots.all_taken());

    assert!(slots.take_receiver("Bill", 1).is_some());
    assert!(slots.take_receiver("Bill", 1).is_none());
    assert!(slots.take_receiver("Bill", 2).is_none());
}

#[tokio::test]
async fn fail_all_skips_resolved_slots() {
    let mut slots = SlotMap::new();
    slots.open("Bill", 1);
    slots.open("BillItemLine", 1);
    slots.open("BillItemLine", 2);
    let first = slots.take_receiver("Bill", 1).unwrap();
    let second = slots.take_receiver("BillItemLine", 2).unwrap();

    slots.resolve("Bill", 1, Ok(response())).unwrap();
    let failed = slots.fail_all(&Error::Upstream("boom".into()));

    assert_eq!(failed, 2);
    assert_eq!(slots.opened(), 3);
    assert!(slots.all_resolved());
    assert!(first.await.unwrap().is_ok());
    assert_eq!(second.await.unwrap(), Err(Error::Upstream("boom".into())));
    assert_eq!(slots.fail_all(&Error::Cancelled), 0);
}
