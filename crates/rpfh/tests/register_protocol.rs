use memory::{Bus, DenseMemory, GuestMemory};
use rpfh::pte::{compose, frame_of, is_remote, PAGE_SIZE};
use rpfh::{
    RpfhConfig, RpfhError, SharedRpfh, REG_EVICTPAGE, REG_FREEPAGE, REG_NEWFRAME, RPFH_MMIO_BASE,
};

const RAM_BASE: u64 = 0x8000_0000;
const PAGE_TABLE: u64 = RAM_BASE;
const G1: u64 = PAGE_TABLE;
const G2: u64 = PAGE_TABLE + 8;
const G3: u64 = PAGE_TABLE + 16;
const G4: u64 = PAGE_TABLE + 24;
const F1: u64 = RAM_BASE + 0x1000;
const F2: u64 = RAM_BASE + 0x2000;
const F3: u64 = RAM_BASE + 0x3000;
const F4: u64 = RAM_BASE + 0x4000;

fn machine() -> (Bus<DenseMemory>, SharedRpfh) {
    let mut bus = Bus::new(RAM_BASE, DenseMemory::new(0x10000).unwrap());
    let rpfh = SharedRpfh::new(RpfhConfig::default());
    rpfh.register(&mut bus).unwrap();
    (bus, rpfh)
}

fn reg(offset: u64) -> u64 {
    RPFH_MMIO_BASE + offset
}

fn pattern(seed: u8) -> Vec<u8> {
    (0..PAGE_SIZE)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn read_page(bus: &Bus<DenseMemory>, frame: u64) -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    bus.ram().read_into(frame, &mut page).unwrap();
    page
}

#[test]
fn concrete_scenario_through_registers() {
    let (mut bus, rpfh) = machine();
    bus.write_u64(G1, compose(F1, 0x01));
    bus.write_u64(G2, compose(F2, 0x05));
    let image = pattern(9);
    bus.ram_mut().write_from(F2, &image).unwrap();

    bus.write_u64(reg(REG_FREEPAGE), G1);
    assert_eq!(bus.read_u64(reg(REG_FREEPAGE)), 1);

    bus.write_u64(reg(REG_EVICTPAGE), G2);
    assert_eq!(bus.read_u64(reg(REG_FREEPAGE)), 1);
    assert_eq!(bus.read_u64(reg(REG_EVICTPAGE)), 0);
    assert_eq!(rpfh.evicted_pages(), 1);

    let remote_pte = bus.read_u64(G2);
    assert!(is_remote(remote_pte));
    assert_eq!(remote_pte & 0xFF, 0x05);
    assert!(read_page(&bus, F2).iter().all(|&b| b == 0));

    // The walker trips over the remote PTE.
    let mut pte = remote_pte;
    let paddr = rpfh
        .fetch_page(bus.ram_mut(), 0x10_0000, &mut pte)
        .unwrap();
    assert_eq!(paddr, F1);
    assert_eq!(frame_of(pte), F1);
    assert_eq!(pte & 0xFF, 0x05);
    assert!(!is_remote(pte));
    assert_eq!(rpfh.free_frames(), 0);
    assert_eq!(rpfh.evicted_pages(), 0);
    assert_eq!(rpfh.pending_new_frames(), 1);
    assert_eq!(read_page(&bus, F1), image);

    assert_eq!(bus.read_u64(reg(REG_NEWFRAME)), pte);
    assert_eq!(bus.read_u64(reg(REG_NEWFRAME)), 0);
    assert_eq!(bus.read_u64(reg(REG_FREEPAGE)), 0);
}

#[test]
fn new_frames_are_reported_in_fetch_order() {
    let (mut bus, rpfh) = machine();
    bus.write_u64(G1, compose(F1, 0x01));
    bus.write_u64(G2, compose(F2, 0x01));
    bus.write_u64(G3, compose(F3, 0x03));
    bus.write_u64(G4, compose(F4, 0x07));

    bus.write_u64(reg(REG_FREEPAGE), G1);
    bus.write_u64(reg(REG_FREEPAGE), G2);
    bus.write_u64(reg(REG_EVICTPAGE), G3);
    bus.write_u64(reg(REG_EVICTPAGE), G4);

    // Fault on B's page first, then A's.
    let b = rpfh
        .handle_remote_fault(bus.ram_mut(), 0x2000, G4)
        .unwrap();
    let a = rpfh
        .handle_remote_fault(bus.ram_mut(), 0x1000, G3)
        .unwrap();
    assert_eq!(b, Some(F1));
    assert_eq!(a, Some(F2));

    let pte_b = bus.read_u64(G4);
    let pte_a = bus.read_u64(G3);
    assert_eq!(pte_b, compose(F1, 0x07));
    assert_eq!(pte_a, compose(F2, 0x03));

    assert_eq!(bus.read_u64(reg(REG_NEWFRAME)), pte_b);
    assert_eq!(bus.read_u64(reg(REG_NEWFRAME)), pte_a);
    assert_eq!(bus.read_u64(reg(REG_NEWFRAME)), 0);
}

#[test]
fn tolerated_anomalies_do_not_disturb_state() {
    let (mut bus, rpfh) = machine();
    bus.write_u64(G1, compose(F1, 0x01));
    bus.write_u64(reg(REG_FREEPAGE), G1);

    bus.write_u64(reg(REG_FREEPAGE), 0);
    bus.write_u64(reg(REG_EVICTPAGE), 0);
    bus.write_u64(reg(REG_NEWFRAME), G1);
    // Sub-register offset inside the window.
    bus.write_u32(reg(0x4), 0x1234);

    assert_eq!(bus.read_u64(reg(REG_FREEPAGE)), 1);
    assert_eq!(bus.read_u32(reg(0xC)), 0);
    assert_eq!(rpfh.stats().ignored_accesses, 5);
    assert!(rpfh.fatal().is_none());
}

#[test]
fn fatal_fault_is_reported_to_the_host() {
    let (mut bus, rpfh) = machine();
    bus.write_u64(G2, compose(F2, 0x01));
    bus.write_u64(reg(REG_EVICTPAGE), G2);

    let err = rpfh
        .handle_remote_fault(bus.ram_mut(), 0x3000, G2)
        .unwrap_err();
    assert_eq!(err, RpfhError::FreePoolEmpty { vaddr: 0x3000 });
    assert_eq!(rpfh.fatal(), Some(err));

    // The guest can no longer drive the controller.
    bus.write_u64(G1, compose(F1, 0x01));
    bus.write_u64(reg(REG_FREEPAGE), G1);
    assert_eq!(rpfh.free_frames(), 0);
    assert_eq!(bus.read_u64(reg(REG_FREEPAGE)), 0);
    assert!(is_remote(bus.read_u64(G2)));
}
