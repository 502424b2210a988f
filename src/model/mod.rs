//! Program model consumed from the frontend.
//!
//! Entities and join points live in arenas and refer to each other through
//! `EntityId` / `JoinPointId` handles. Parent, base and derived links are plain
//! handles; nothing here owns another node.

pub mod document;

use std::collections::{HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

pub use document::{ExpansionSpec, TokenSpec, UnitDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JoinPointId(pub usize);

/// Index into the unit's token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub usize);

/// Inclusive token range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSpan {
    pub first: TokenId,
    pub last: TokenId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Namespace,
    Class,
    Aspect,
    Function,
    Variable,
    ClassSlice,
}

impl EntityKind {
    /// Kinds that open a scope for class-like lookup (bases/derived).
    pub fn is_class_like(self) -> bool {
        matches!(self, EntityKind::Class | EntityKind::Aspect)
    }

    pub fn is_scope(self) -> bool {
        matches!(
            self,
            EntityKind::Namespace | EntityKind::Class | EntityKind::Aspect | EntityKind::ClassSlice
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    NonMember,
    StaticNonMember,
    Member,
    StaticMember,
    VirtualMember,
    PureVirtualMember,
    Constructor,
    Destructor,
    VirtualDestructor,
    Builtin,
}

impl FunctionKind {
    pub fn is_static(self) -> bool {
        matches!(self, FunctionKind::StaticNonMember | FunctionKind::StaticMember)
    }

    pub fn is_virtual(self) -> bool {
        matches!(
            self,
            FunctionKind::VirtualMember
                | FunctionKind::PureVirtualMember
                | FunctionKind::VirtualDestructor
        )
    }

    /// Non-static member functions: the ones that have a `this` object.
    pub fn has_this(self) -> bool {
        matches!(
            self,
            FunctionKind::Member
                | FunctionKind::VirtualMember
                | FunctionKind::PureVirtualMember
                | FunctionKind::Constructor
                | FunctionKind::Destructor
                | FunctionKind::VirtualDestructor
        )
    }

    pub fn is_structor(self) -> bool {
        matches!(
            self,
            FunctionKind::Constructor | FunctionKind::Destructor | FunctionKind::VirtualDestructor
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub kind: FunctionKind,
    /// Result type spelling; `None` for constructors and destructors.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub is_const: bool,
    #[serde(default)]
    pub is_volatile: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    NonMember,
    Member,
    StaticMember,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    #[serde(rename = "type")]
    pub ty: String,
    pub kind: VariableKind,
    /// Variables this one may refer to, as computed by the frontend's dataflow.
    #[serde(default)]
    pub aliases: Vec<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub name: String,
    #[serde(default)]
    pub parent: Option<EntityId>,
    /// Declaration span. For classes this covers the body braces.
    #[serde(default)]
    pub span: Option<TokenSpan>,
    #[serde(default)]
    pub bases: Vec<EntityId>,
    #[serde(skip)]
    pub derived: Vec<EntityId>,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub function: Option<FunctionInfo>,
    #[serde(default)]
    pub variable: Option<VariableInfo>,
}

impl Entity {
    pub fn new(kind: EntityKind, name: impl Into<String>, parent: Option<EntityId>) -> Self {
        Self {
            kind,
            name: name.into(),
            parent,
            span: None,
            bases: Vec::new(),
            derived: Vec::new(),
            attributes: Vec::new(),
            function: None,
            variable: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPointKind {
    Execution,
    Construction,
    Destruction,
    Call,
    Get,
    Set,
    Ref,
    Builtin,
}

impl JoinPointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinPointKind::Execution => "execution",
            JoinPointKind::Construction => "construction",
            JoinPointKind::Destruction => "destruction",
            JoinPointKind::Call => "call",
            JoinPointKind::Get => "get",
            JoinPointKind::Set => "set",
            JoinPointKind::Ref => "ref",
            JoinPointKind::Builtin => "builtin",
        }
    }

    pub fn is_data(self) -> bool {
        matches!(self, JoinPointKind::Get | JoinPointKind::Set | JoinPointKind::Ref)
    }
}

impl fmt::Display for JoinPointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinPoint {
    pub kind: JoinPointKind,
    /// Function, variable or builtin operator the event is about.
    pub target: EntityId,
    /// Entity in whose body the event occurs (the function itself for execution).
    pub parent: EntityId,
    #[serde(default)]
    pub local_id: u32,
    #[serde(default)]
    pub forwarded_from: Option<JoinPointId>,
    #[serde(default)]
    pub span: Option<TokenSpan>,
    #[serde(default)]
    pub attributes: Vec<String>,
}

/// Arena of entities and join points for one translation unit.
#[derive(Debug, Clone, Default)]
pub struct ProgramModel {
    entities: Vec<Entity>,
    join_points: Vec<JoinPoint>,
}

impl ProgramModel {
    /// Empty model containing only the root namespace.
    pub fn new() -> Self {
        Self {
            entities: vec![Entity::new(EntityKind::Namespace, "", None)],
            join_points: Vec::new(),
        }
    }

    /// Build a model from frontend output. Derived sets are computed from bases.
    pub fn from_parts(entities: Vec<Entity>, join_points: Vec<JoinPoint>) -> anyhow::Result<Self> {
        let Some(root) = entities.first() else {
            anyhow::bail!("program model has no root namespace");
        };
        if root.kind != EntityKind::Namespace || root.parent.is_some() {
            anyhow::bail!("entity 0 must be the root namespace");
        }
        let n = entities.len();
        for (i, e) in entities.iter().enumerate() {
            let refs = e.parent.iter().chain(e.bases.iter());
            for r in refs {
                if r.0 >= n {
                    anyhow::bail!("entity {i} ({}) refers to missing entity {}", e.name, r.0);
                }
            }
            if i > 0 && e.parent.is_none() {
                anyhow::bail!("entity {i} ({}) has no parent", e.name);
            }
            let aliases = e.variable.iter().flat_map(|v| v.aliases.iter());
            for a in aliases {
                if entities.get(a.0).is_none_or(|t| t.kind != EntityKind::Variable) {
                    anyhow::bail!("variable {i} ({}) aliases {}, which is not a variable", e.name, a.0);
                }
            }
        }
        // every parent chain has to end at the root
        for (i, e) in entities.iter().enumerate() {
            let mut cur = e.parent;
            let mut steps = 0;
            while let Some(p) = cur {
                steps += 1;
                if steps > n {
                    anyhow::bail!("entity {i} ({}) has a cyclic parent chain", e.name);
                }
                cur = entities[p.0].parent;
            }
        }
        for (i, jp) in join_points.iter().enumerate() {
            if jp.target.0 >= n || jp.parent.0 >= n {
                anyhow::bail!("join point {i} refers to a missing entity");
            }
            if jp.forwarded_from.is_some_and(|f| f.0 >= join_points.len()) {
                anyhow::bail!("join point {i} is forwarded from a missing join point");
            }
        }

        let mut model = Self {
            entities,
            join_points,
        };
        model.rebuild_derived();
        Ok(model)
    }

    fn rebuild_derived(&mut self) {
        for e in &mut self.entities {
            e.derived.clear();
        }
        for i in 0..self.entities.len() {
            let bases = self.entities[i].bases.clone();
            for b in bases {
                let derived = &mut self.entities[b.0].derived;
                if !derived.contains(&EntityId(i)) {
                    derived.push(EntityId(i));
                }
            }
        }
    }

    pub fn root(&self) -> EntityId {
        EntityId(0)
    }

    pub fn add_entity(&mut self, entity: Entity) -> EntityId {
        let id = EntityId(self.entities.len());
        for b in &entity.bases {
            self.entities[b.0].derived.push(id);
        }
        self.entities.push(entity);
        id
    }

    pub fn add_join_point(&mut self, jp: JoinPoint) -> JoinPointId {
        let id = JoinPointId(self.join_points.len());
        self.join_points.push(jp);
        id
    }

    /// Add a base class link and keep the derived side in sync.
    pub fn add_base(&mut self, class: EntityId, base: EntityId) {
        if class == base || self.entities[class.0].bases.contains(&base) {
            return;
        }
        self.entities[class.0].bases.push(base);
        self.entities[base.0].derived.push(class);
    }

    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id.0]
    }

    pub fn join_point(&self, id: JoinPointId) -> &JoinPoint {
        &self.join_points[id.0]
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        (0..self.entities.len()).map(EntityId)
    }

    pub fn join_point_ids(&self) -> impl Iterator<Item = JoinPointId> + '_ {
        (0..self.join_points.len()).map(JoinPointId)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn join_point_count(&self) -> usize {
        self.join_points.len()
    }

    pub fn children(&self, scope: EntityId) -> impl Iterator<Item = EntityId> + '_ {
        self.entity_ids()
            .filter(move |&id| self.entities[id.0].parent == Some(scope))
    }

    /// Enclosing scopes from the innermost outward, ending with the root.
    pub fn scopes_of(&self, id: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut cur = self.entities[id.0].parent;
        while let Some(p) = cur {
            out.push(p);
            cur = self.entities[p.0].parent;
        }
        out
    }

    /// Names of the enclosing scopes, outermost first, root excluded.
    pub fn scope_names(&self, id: EntityId) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .scopes_of(id)
            .into_iter()
            .filter(|&s| s != self.root())
            .map(|s| self.entities[s.0].name.as_str())
            .collect();
        names.reverse();
        names
    }

    pub fn qualified_name(&self, id: EntityId) -> String {
        if id == self.root() {
            return "::".to_string();
        }
        let mut parts = self.scope_names(id);
        parts.push(self.entities[id.0].name.as_str());
        parts.join("::")
    }

    /// Find an entity by fully qualified name (`ns::A`, optional leading `::`).
    pub fn lookup(&self, qualified: &str) -> Option<EntityId> {
        let trimmed = qualified.trim().trim_start_matches("::");
        if trimmed.is_empty() {
            return Some(self.root());
        }
        let mut cur = self.root();
        for seg in trimmed.split("::") {
            cur = self
                .children(cur)
                .find(|&c| self.entities[c.0].name == seg)?;
        }
        Some(cur)
    }

    /// The class a function or variable is a member of.
    pub fn enclosing_class(&self, id: EntityId) -> Option<EntityId> {
        let parent = self.entities[id.0].parent?;
        self.entities[parent.0].kind.is_class_like().then_some(parent)
    }

    /// Transitive bases, breadth first, excluding `id` itself.
    pub fn all_bases(&self, id: EntityId) -> Vec<EntityId> {
        self.walk(id, |e| &e.bases)
    }

    /// Transitive derived classes, breadth first, excluding `id` itself.
    pub fn all_derived(&self, id: EntityId) -> Vec<EntityId> {
        self.walk(id, |e| &e.derived)
    }

    // Multiple inheritance reconverges, so the walk tracks visited nodes.
    fn walk(&self, start: EntityId, next: impl Fn(&Entity) -> &Vec<EntityId>) -> Vec<EntityId> {
        let mut seen = HashSet::from([start]);
        let mut queue: VecDeque<EntityId> = next(&self.entities[start.0]).iter().copied().collect();
        let mut out = Vec::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            out.push(id);
            queue.extend(next(&self.entities[id.0]).iter().copied());
        }
        out
    }

    pub fn is_derived_from(&self, class: EntityId, base: EntityId) -> bool {
        class == base || self.all_bases(class).contains(&base)
    }

    /// Same-named members of `class` (used by `base`/`derived` on functions).
    pub fn member_named(&self, class: EntityId, name: &str, kind: EntityKind) -> Option<EntityId> {
        self.children(class).find(|&c| {
            let e = &self.entities[c.0];
            e.kind == kind && e.name == name
        })
    }

    /// Human readable signature of a function or variable.
    pub fn signature(&self, id: EntityId) -> String {
        let e = &self.entities[id.0];
        let qualified = self.qualified_name(id);
        if let Some(f) = &e.function {
            let mut s = String::new();
            if let Some(result) = &f.result {
                s.push_str(result);
                s.push(' ');
            }
            s.push_str(&qualified);
            s.push('(');
            s.push_str(&f.params.join(", "));
            s.push(')');
            if f.is_const {
                s.push_str(" const");
            }
            if f.is_volatile {
                s.push_str(" volatile");
            }
            s
        } else if let Some(v) = &e.variable {
            format!("{} {qualified}", v.ty)
        } else {
            qualified
        }
    }

    pub fn describe_join_point(&self, id: JoinPointId) -> String {
        let jp = &self.join_points[id.0];
        let mut out = format!("{}({})", jp.kind, self.signature(jp.target));
        if jp.kind != JoinPointKind::Execution && jp.parent != jp.target {
            out.push_str(&format!(" in {}", self.qualified_name(jp.parent)));
        }
        if jp.local_id > 0 {
            out.push_str(&format!(" #{}", jp.local_id));
        }
        out
    }
}

/// Convenience constructor used by tests and by callers building a model by hand.
pub struct ModelBuilder {
    model: ProgramModel,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            model: ProgramModel::new(),
        }
    }

    pub fn root(&self) -> EntityId {
        self.model.root()
    }

    pub fn namespace(&mut self, name: &str, parent: EntityId) -> EntityId {
        self.model
            .add_entity(Entity::new(EntityKind::Namespace, name, Some(parent)))
    }

    pub fn class(&mut self, name: &str, parent: EntityId, bases: &[EntityId]) -> EntityId {
        self.class_like(EntityKind::Class, name, parent, bases)
    }

    pub fn aspect(&mut self, name: &str, parent: EntityId, bases: &[EntityId]) -> EntityId {
        self.class_like(EntityKind::Aspect, name, parent, bases)
    }

    fn class_like(
        &mut self,
        kind: EntityKind,
        name: &str,
        parent: EntityId,
        bases: &[EntityId],
    ) -> EntityId {
        let mut e = Entity::new(kind, name, Some(parent));
        e.bases = bases.to_vec();
        self.model.add_entity(e)
    }

    pub fn function(
        &mut self,
        name: &str,
        parent: EntityId,
        kind: FunctionKind,
        result: Option<&str>,
        params: &[&str],
    ) -> EntityId {
        let mut e = Entity::new(EntityKind::Function, name, Some(parent));
        e.function = Some(FunctionInfo {
            kind,
            result: result.map(str::to_string),
            params: params.iter().map(|p| p.to_string()).collect(),
            is_const: false,
            is_volatile: false,
        });
        self.model.add_entity(e)
    }

    pub fn variable(&mut self, name: &str, parent: EntityId, ty: &str, kind: VariableKind) -> EntityId {
        let mut e = Entity::new(EntityKind::Variable, name, Some(parent));
        e.variable = Some(VariableInfo {
            ty: ty.to_string(),
            kind,
            aliases: Vec::new(),
        });
        self.model.add_entity(e)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.model.entities[id.0]
    }

    pub fn join_point(
        &mut self,
        kind: JoinPointKind,
        target: EntityId,
        parent: EntityId,
        span: Option<(usize, usize)>,
    ) -> JoinPointId {
        self.model.add_join_point(JoinPoint {
            kind,
            target,
            parent,
            local_id: 0,
            forwarded_from: None,
            span: span.map(|(first, last)| TokenSpan {
                first: TokenId(first),
                last: TokenId(last),
            }),
            attributes: Vec::new(),
        })
    }

    pub fn build(self) -> ProgramModel {
        self.model
    }
}
