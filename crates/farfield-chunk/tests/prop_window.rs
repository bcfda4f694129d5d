use farfield_chunk::{Section, Tile, Window};
use farfield_world::{Stage, TilePos};
use proptest::prelude::*;

fn coord() -> impl Strategy<Value = i32> {
    -100_000i32..=100_000
}

fn side() -> impl Strategy<Value = usize> {
    1usize..=9
}

proptest! {
    // rel_to_abs and abs_to_rel are inverse over the whole window
    #[test]
    fn rel_abs_round_trip(ox in coord(), oz in coord(), s in side()) {
        let w = Window::new(TilePos::new(ox, oz), s);
        for rz in 0..s { for rx in 0..s {
            let abs = w.rel_to_abs(rx, rz);
            prop_assert_eq!(w.abs_to_rel(abs), Some((rx, rz)));
        }}
        prop_assert_eq!(w.abs_to_rel(TilePos::new(ox - 1, oz)), None);
        prop_assert_eq!(w.abs_to_rel(TilePos::new(ox, oz + s as i32)), None);
    }

    // a cutout is always a centered sub-square of the window
    #[test]
    fn cutout_stays_inside(ox in coord(), oz in coord(), s in side(), trim in 0usize..6) {
        let w = Window::new(TilePos::new(ox, oz), s);
        let c = w.cutout(trim);
        prop_assert_eq!(c.side(), s.saturating_sub(2 * trim));
        let mut n = 0;
        for p in c.positions() {
            prop_assert!(w.contains(p));
            let (rx, rz) = w.abs_to_rel(p).unwrap();
            prop_assert!(rx >= trim && rz >= trim);
            n += 1;
        }
        prop_assert_eq!(n, c.side() * c.side());
    }

    // tiles survive a drain/refill cycle in their slots
    #[test]
    fn drain_refill_preserves_tiles(ox in coord(), oz in coord(), s in side()) {
        let mut w = Window::new(TilePos::new(ox, oz), s);
        let positions: Vec<_> = w.positions().collect();
        for (i, p) in positions.iter().enumerate() {
            let mut t = Tile::empty(*p, 0, 16);
            if i % 2 == 0 {
                t.advance_to(Stage::Noise);
                t.sections[0] = Some(Section::default());
            }
            prop_assert!(w.put(t).is_ok());
        }
        let drained = w.drain();
        prop_assert_eq!(drained.len(), s * s);
        prop_assert!(w.refill(drained).is_empty());
        for (i, p) in positions.iter().enumerate() {
            let t = w.get(*p).unwrap();
            prop_assert_eq!(t.pos, *p);
            prop_assert_eq!(t.stage() == Stage::Noise, i % 2 == 0);
        }
    }
}
