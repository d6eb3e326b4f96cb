use std::collections::BTreeMap;

use mlua::RegistryKey;

#[derive(Debug, Clone)]
pub(super) struct Costume {
    name: String,
    source: String,
}

impl Costume {
    pub(super) fn name(&self) -> &str {
        self.name.as_str()
    }

    pub(super) fn source(&self) -> &str {
        self.source.as_str()
    }
}

#[derive(Debug)]
pub(super) struct SpriteRecord {
    name: String,
    x: f64,
    y: f64,
    direction: f64,
    costumes: Vec<Costume>,
    current_costume: usize,
    next_costume_id: u32,
    scripts: Vec<u32>,
    table: Option<RegistryKey>,
}

impl SpriteRecord {
    fn new(name: String) -> Self {
        SpriteRecord {
            name,
            x: 0.0,
            y: 0.0,
            // Degrees; 90 faces right.
            direction: 90.0,
            costumes: Vec::new(),
            current_costume: 0,
            next_costume_id: 1,
            scripts: Vec::new(),
            table: None,
        }
    }

    pub(super) fn name(&self) -> &str {
        self.name.as_str()
    }

    pub(super) fn x(&self) -> f64 {
        self.x
    }

    pub(super) fn y(&self) -> f64 {
        self.y
    }

    pub(super) fn direction(&self) -> f64 {
        self.direction
    }

    pub(super) fn scripts(&self) -> &[u32] {
        &self.scripts
    }

    pub(super) fn push_script(&mut self, handle: u32) {
        self.scripts.push(handle);
    }

    pub(super) fn table_key(&self) -> Option<&RegistryKey> {
        self.table.as_ref()
    }

    pub(super) fn attach_table(&mut self, key: RegistryKey) {
        self.table = Some(key);
    }

    pub(super) fn current_costume(&self) -> Option<&Costume> {
        self.costumes.get(self.current_costume)
    }

    pub(super) fn add_costume(&mut self, source: String, name: Option<String>) -> String {
        let name = name.unwrap_or_else(|| {
            let id = self.next_costume_id;
            format!("costume{id}")
        });
        self.next_costume_id += 1;
        self.costumes.push(Costume {
            name: name.clone(),
            source,
        });
        name
    }

    /// Returns true if the current costume changed (a visible mutation).
    pub(super) fn switch_costume(&mut self, name: &str) -> bool {
        match self.costumes.iter().position(|costume| costume.name == name) {
            Some(index) if index != self.current_costume => {
                self.current_costume = index;
                true
            }
            _ => false,
        }
    }

    pub(super) fn set_x(&mut self, value: f64) {
        self.x = value;
    }

    pub(super) fn set_y(&mut self, value: f64) {
        self.y = value;
    }

    pub(super) fn go_to(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    pub(super) fn point_in_direction(&mut self, degrees: f64) {
        self.direction = degrees;
    }

    pub(super) fn turn(&mut self, degrees: f64) {
        self.direction += degrees;
    }
}

/// Registry of every sprite on the stage, keyed by ascending handle so
/// iteration follows registration order.
#[derive(Debug, Default)]
pub(super) struct SpriteStore {
    next_handle: u32,
    records: BTreeMap<u32, SpriteRecord>,
}

impl SpriteStore {
    pub(super) fn new() -> Self {
        SpriteStore {
            next_handle: 1,
            records: BTreeMap::new(),
        }
    }

    /// Registers a sprite. Names are unique within a stage: adding under a
    /// taken name displaces the old record, which is returned so its
    /// scripts can be retired.
    pub(super) fn add(&mut self, name: Option<String>) -> (u32, String, Option<SpriteRecord>) {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        let name = name.unwrap_or_else(|| format!("sprite{handle}"));
        let replaced = self
            .records
            .iter()
            .find_map(|(old, record)| (record.name == name).then_some(*old))
            .and_then(|old| self.records.remove(&old));
        let event = if replaced.is_some() {
            format!("sprite.replace {name} (#{handle})")
        } else {
            format!("sprite.add {name} (#{handle})")
        };
        self.records.insert(handle, SpriteRecord::new(name));
        (handle, event, replaced)
    }

    pub(super) fn get(&self, handle: u32) -> Option<&SpriteRecord> {
        self.records.get(&handle)
    }

    pub(super) fn get_mut(&mut self, handle: u32) -> Option<&mut SpriteRecord> {
        self.records.get_mut(&handle)
    }

    pub(super) fn handle_by_name(&self, name: &str) -> Option<u32> {
        self.records
            .iter()
            .find_map(|(handle, record)| (record.name == name).then_some(*handle))
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = (&u32, &SpriteRecord)> {
        self.records.iter()
    }

    pub(super) fn len(&self) -> usize {
        self.records.len()
    }
}
