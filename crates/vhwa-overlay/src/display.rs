//! Surface arena and the primary/overlay lists that decide what is on screen.
//!
//! Surfaces refer to each other (an overlay to the primary it is keyed against, every surface to
//! the list it belongs to) by id. The [`Display`] owns all of them and resolves those ids.

use hashbrown::HashMap;

use crate::gl::GlBackend;
use crate::program::ProgramManager;
use crate::rect::Rect;
use crate::surface::VhwaSurface;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListId(u32);

/// Surfaces of one complex group and which of them is the visible front buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SurfList {
    surfaces: Vec<SurfaceId>,
    current: Option<SurfaceId>,
}

impl SurfList {
    pub fn surfaces(&self) -> &[SurfaceId] {
        &self.surfaces
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.surfaces.contains(&id)
    }

    pub fn first(&self) -> Option<SurfaceId> {
        self.surfaces.first().copied()
    }

    pub fn current(&self) -> Option<SurfaceId> {
        self.current
    }

    /// Selects the visible member; ids that are not members hide the list.
    pub fn set_current(&mut self, id: Option<SurfaceId>) {
        self.current = id.filter(|id| self.contains(*id));
    }

    fn push(&mut self, id: SurfaceId) {
        self.surfaces.push(id);
    }

    fn remove(&mut self, id: SurfaceId) {
        self.surfaces.retain(|s| *s != id);
        if self.current == Some(id) {
            self.current = None;
        }
    }
}

pub struct Display {
    surfaces: HashMap<SurfaceId, VhwaSurface>,
    lists: HashMap<ListId, SurfList>,
    next_surface: u32,
    next_list: u32,
    vga: Option<SurfaceId>,
    primary_list: ListId,
    overlays: Vec<ListId>,
    display_primary: bool,
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

impl Display {
    pub fn new() -> Self {
        let primary_list = ListId(0);
        let mut lists = HashMap::new();
        lists.insert(primary_list, SurfList::default());
        Self {
            surfaces: HashMap::new(),
            lists,
            next_surface: 1,
            next_list: 1,
            vga: None,
            primary_list,
            overlays: Vec::new(),
            display_primary: true,
        }
    }

    pub fn insert_surface(&mut self, surface: VhwaSurface) -> SurfaceId {
        let id = SurfaceId(self.next_surface);
        self.next_surface += 1;
        self.surfaces.insert(id, surface);
        id
    }

    /// Detaches `id` from its list and hands the surface back for GL cleanup. Overlays still
    /// pointing at it as their primary lose that link.
    pub fn take_surface(&mut self, id: SurfaceId) -> Option<VhwaSurface> {
        self.remove_from_list(id);
        let surface = self.surfaces.remove(&id)?;
        if self.vga == Some(id) {
            self.vga = None;
        }
        for other in self.surfaces.values_mut() {
            if other.primary() == Some(id) {
                other.set_primary(None);
            }
        }
        Some(surface)
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&VhwaSurface> {
        self.surfaces.get(&id)
    }

    pub fn surface_mut(&mut self, id: SurfaceId) -> Option<&mut VhwaSurface> {
        self.surfaces.get_mut(&id)
    }

    pub fn surface_ids(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.surfaces.keys().copied()
    }

    pub fn create_list(&mut self) -> ListId {
        let id = ListId(self.next_list);
        self.next_list += 1;
        self.lists.insert(id, SurfList::default());
        id
    }

    pub fn list(&self, id: ListId) -> Option<&SurfList> {
        self.lists.get(&id)
    }

    pub fn list_mut(&mut self, id: ListId) -> Option<&mut SurfList> {
        self.lists.get_mut(&id)
    }

    /// List that `surface` belongs to.
    pub fn list_of(&self, surface: SurfaceId) -> Option<ListId> {
        self.surface(surface)?.list()
    }

    /// Moves `surface` to the end of `list`, leaving any list it was in before.
    pub fn add_to_list(&mut self, list: ListId, surface: SurfaceId) {
        if !self.lists.contains_key(&list) {
            return;
        }
        self.remove_from_list(surface);
        if let Some(l) = self.lists.get_mut(&list) {
            l.push(surface);
        }
        if let Some(s) = self.surfaces.get_mut(&surface) {
            s.set_list(Some(list));
        }
    }

    pub fn remove_from_list(&mut self, surface: SurfaceId) {
        let Some(list) = self.surfaces.get_mut(&surface).and_then(|s| {
            let list = s.list();
            s.set_list(None);
            list
        }) else {
            return;
        };
        if let Some(l) = self.lists.get_mut(&list) {
            l.remove(surface);
        }
    }

    /// Drops an emptied list. The primary list is never dropped.
    pub fn delete_list(&mut self, list: ListId) {
        if list == self.primary_list {
            return;
        }
        self.remove_overlay(list);
        if let Some(l) = self.lists.remove(&list) {
            for id in l.surfaces {
                if let Some(s) = self.surfaces.get_mut(&id) {
                    s.set_list(None);
                }
            }
        }
    }

    pub fn vga(&self) -> Option<SurfaceId> {
        self.vga
    }

    /// Installs a new VGA surface as the only visible primary. Previous primaries move to a
    /// detached list and the overlay set is cleared. Returns the previous VGA surface.
    pub fn set_vga(&mut self, vga: Option<SurfaceId>) -> Option<SurfaceId> {
        let old = self.vga.take();
        let stale: Vec<SurfaceId> = self.primaries().surfaces().to_vec();
        if !stale.is_empty() {
            let orphans = self.create_list();
            for id in stale {
                self.add_to_list(orphans, id);
            }
        }
        if let Some(id) = vga {
            self.add_to_list(self.primary_list, id);
            if let Some(l) = self.lists.get_mut(&self.primary_list) {
                l.set_current(Some(id));
            }
        }
        self.vga = vga;
        self.overlays.clear();
        old
    }

    /// Points the VGA role at another member of the primary list.
    pub fn update_vga(&mut self, vga: SurfaceId) -> Option<SurfaceId> {
        self.vga.replace(vga)
    }

    /// Visible primary surface.
    pub fn primary(&self) -> Option<SurfaceId> {
        self.primaries().current()
    }

    pub fn primary_list(&self) -> ListId {
        self.primary_list
    }

    pub fn primaries(&self) -> &SurfList {
        // The primary list is created with the display and never removed.
        static EMPTY: SurfList = SurfList {
            surfaces: Vec::new(),
            current: None,
        };
        self.lists.get(&self.primary_list).unwrap_or(&EMPTY)
    }

    pub fn is_primary(&self, surface: SurfaceId) -> bool {
        self.list_of(surface) == Some(self.primary_list)
    }

    pub fn add_overlay(&mut self, list: ListId) {
        self.overlays.push(list);
    }

    pub fn check_add_overlay(&mut self, list: ListId) {
        if !self.has_overlay(list) {
            self.add_overlay(list);
        }
    }

    pub fn has_overlay(&self, list: ListId) -> bool {
        self.overlays.contains(&list)
    }

    pub fn remove_overlay(&mut self, list: ListId) {
        self.overlays.retain(|l| *l != list);
    }

    pub fn overlays(&self) -> &[ListId] {
        &self.overlays
    }

    /// Visible member of each overlay list, in overlay order.
    pub fn visible_overlays(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.overlays
            .iter()
            .filter_map(|l| self.lists.get(l).and_then(SurfList::current))
    }

    pub fn display_primary(&self) -> bool {
        self.display_primary
    }

    pub fn set_display_primary(&mut self, display: bool) {
        self.display_primary = display;
    }

    /// Rebuilds the cached draw of `id` against its current primary.
    pub fn init_surface_display<G: GlBackend>(
        &mut self,
        gl: &mut G,
        programs: &mut ProgramManager,
        id: SurfaceId,
    ) {
        let Some(surface) = self.surfaces.get(&id) else {
            return;
        };
        let primary = surface
            .primary()
            .filter(|p| *p != id)
            .and_then(|p| self.surfaces.get(&p));
        let params = surface.display_params(primary);
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.apply_display(gl, programs, params);
        }
    }

    /// Clips `id` against `visible` and refreshes its cached draw.
    #[allow(clippy::too_many_arguments)]
    pub fn update_visibility<G: GlBackend>(
        &mut self,
        gl: &mut G,
        programs: &mut ProgramManager,
        id: SurfaceId,
        primary: Option<SurfaceId>,
        visible: Rect,
        not_intersected: bool,
        force: bool,
    ) {
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.update_visibility(primary, visible, not_intersected, force);
            self.init_surface_display(gl, programs, id);
        }
    }

    /// Uploads what `id` (and the primary it keys against) needs, then draws it if anything
    /// changed or `force` is set. Returns whether it drew.
    pub fn perform_surface_display<G: GlBackend>(
        &mut self,
        gl: &mut G,
        programs: &mut ProgramManager,
        id: SurfaceId,
        primary: Option<SurfaceId>,
        mut force: bool,
    ) -> bool {
        let primary = primary.filter(|p| *p != id);
        let (vis_src, vis_targ, keyed) = {
            let Some(surface) = self.surfaces.get(&id) else {
                return false;
            };
            if surface.visible_targ_rect().is_empty() {
                return false;
            }
            let keyed = surface
                .active_dst_overlay_key(primary.and_then(|p| self.surfaces.get(&p)))
                .is_some();
            (surface.visible_src_rect(), surface.visible_targ_rect(), keyed)
        };

        if let Some(surface) = self.surfaces.get_mut(&id) {
            force |= surface.synch_tex_mem(gl, programs, &vis_src);
        }
        if keyed {
            if let Some(p) = primary.and_then(|p| self.surfaces.get_mut(&p)) {
                force |= p.synch_tex_mem(gl, programs, &vis_targ);
            }
        }
        if force {
            if let Some(surface) = self.surfaces.get_mut(&id) {
                surface.draw(gl, programs);
            }
        }
        force
    }

    /// Paints the primary (unless an overlay covers it) then every visible overlay over it.
    pub fn perform_display<G: GlBackend>(
        &mut self,
        gl: &mut G,
        programs: &mut ProgramManager,
        mut force: bool,
    ) -> bool {
        let primary = self.primary();
        if self.display_primary {
            if let Some(p) = primary {
                force |= self.perform_surface_display(gl, programs, p, None, force);
            }
        }
        let overlays: Vec<SurfaceId> = self.visible_overlays().collect();
        for overlay in overlays {
            force |= self.perform_surface_display(gl, programs, overlay, primary, force);
        }
        force
    }
}
