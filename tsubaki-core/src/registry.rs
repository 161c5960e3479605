//! ブレークポイントレジストリ

use crate::breakpoint::BreakpointSpec;
use crate::errors::SyntaxError;
use crate::parse::parse;
use tracing::debug;

/// ブレークポイントレジストリ
///
/// 起動時に登録されたブレークポイントを登録順に保持します。
/// 個別の削除はなく、トレーサーと一緒に破棄されます。
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    breakpoints: Vec<BreakpointSpec>,
}

impl BreakpointRegistry {
    /// 空のレジストリを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定文字列の列から構築する
    ///
    /// 最初の構文エラーで中断します。
    pub fn from_specs<I, S>(specs: I) -> Result<Self, SyntaxError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::new();
        for spec in specs {
            registry.parse_and_insert(spec.as_ref())?;
        }
        Ok(registry)
    }

    /// 末尾にブレークポイントを追加する
    pub fn insert(&mut self, breakpoint: BreakpointSpec) {
        debug!("Registered user breakpoint \"{}\": {:?}", breakpoint.name, breakpoint.condition);
        self.breakpoints.push(breakpoint);
    }

    /// 指定文字列をパースして追加する
    pub fn parse_and_insert(&mut self, spec: &str) -> Result<(), SyntaxError> {
        self.insert(parse(spec)?);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&BreakpointSpec> {
        self.breakpoints.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BreakpointSpec> {
        self.breakpoints.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut BreakpointSpec> {
        self.breakpoints.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::Condition;

    #[test]
    fn test_insertion_order() {
        let registry = BreakpointRegistry::from_specs(["segv", "oid=2", "entry"]).unwrap();
        let names: Vec<&str> = registry.iter().map(|bp| bp.name.as_str()).collect();
        assert_eq!(names, ["segv", "oid=2", "entry"]);
        assert_eq!(registry.get(1).unwrap().condition, Condition::OperationId(2));
    }

    #[test]
    fn test_from_specs_stops_at_syntax_error() {
        let err = BreakpointRegistry::from_specs(["segv", "nope", "entry"]).unwrap_err();
        assert_eq!(err.input, "nope");
    }

    #[test]
    fn test_empty_registry() {
        let registry = BreakpointRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }
}
