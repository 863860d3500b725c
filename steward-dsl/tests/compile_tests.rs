//! End-to-end compiler tests: source text in, evaluated model out.

use pretty_assertions::assert_eq;
use std::path::PathBuf;
use steward_core::{CompileError, Value};
use steward_dsl::{Compiled, Compiler};

fn compile(source: &str) -> Compiled {
    Compiler::new()
        .compile_source(source, PathBuf::from("<test>"))
        .expect("compilation failed")
}

fn compile_err(source: &str) -> CompileError {
    Compiler::new()
        .compile_source(source, PathBuf::from("<test>"))
        .expect_err("compilation unexpectedly succeeded")
}

// ----------------------------------------------------------------------
// Expressions and comparisons
// ----------------------------------------------------------------------

#[test]
fn equality_is_typed() {
    let compiled = compile("a = 3 == 3");
    assert_eq!(compiled.get("a"), Some(Value::Bool(true)));

    let compiled = compile("a = 4 == 3");
    assert_eq!(compiled.get("a"), Some(Value::Bool(false)));

    let compiled = compile("a = '3' == '3'");
    assert_eq!(compiled.get("a"), Some(Value::Bool(true)));

    let compiled = compile("a = 3 == '3'");
    assert_eq!(compiled.get("a"), Some(Value::Bool(false)));

    let compiled = compile("a = 3 != '3'");
    assert_eq!(compiled.get("a"), Some(Value::Bool(true)));
}

#[test]
fn cross_type_ordering_is_rejected() {
    let err = compile_err("a = 4 <= '3'");
    assert!(matches!(err, CompileError::Compilation { .. }));
}

#[test]
fn arithmetic_precedence_values() {
    let compiled = compile("a = 1 + 4 // 2 + 3");
    assert_eq!(compiled.get("a"), Some(Value::Int(6)));

    let compiled = compile("a = 1 + 2 // -3 ** 2 + -7 * 2");
    assert_eq!(compiled.get("a"), Some(Value::Int(-14)));

    let compiled = compile("a = ((1 + 2) // -3) ** 2 + -(7 * 2)");
    assert_eq!(compiled.get("a"), Some(Value::Int(-13)));
}

#[test]
fn integer_division_yields_float() {
    let compiled = compile("a = 3 / 2");
    assert_eq!(compiled.get("a"), Some(Value::Float(1.5)));
}

#[test]
fn division_by_zero_is_a_compile_error() {
    assert!(matches!(
        compile_err("a = 1 // 0"),
        CompileError::Compilation { .. }
    ));
}

#[test]
fn string_concat_and_repeat() {
    let compiled = compile("a = \"auto\" \" concat\" \" string\"");
    assert_eq!(compiled.get("a"), Some(Value::str("auto concat string")));

    let compiled = compile("a = 'ab' + 'cd'\nb = 'x' * 3");
    assert_eq!(compiled.get("a"), Some(Value::str("abcd")));
    assert_eq!(compiled.get("b"), Some(Value::str("xxx")));
}

#[test]
fn boolean_operators_short_circuit() {
    let compiled = compile("a = True and False\nb = False or True\nc = not True");
    assert_eq!(compiled.get("a"), Some(Value::Bool(false)));
    assert_eq!(compiled.get("b"), Some(Value::Bool(true)));
    assert_eq!(compiled.get("c"), Some(Value::Bool(false)));
}

#[test]
fn f_strings_interpolate_in_scope() {
    let compiled = compile("name = 'world'\nn = 2\ngreeting = f\"hello {name}{'!' * n}\"");
    assert_eq!(compiled.get("greeting"), Some(Value::str("hello world!!")));
}

#[test]
fn f_strings_hide_protected_values() {
    std::env::set_var("STEWARD_TEST_TOKEN", "hunter2");
    let source = "\
import std.env
secret = std.env.get_secret(\"STEWARD_TEST_TOKEN\")
shown = f\"token: {secret}\"
";
    let compiled = compile(source);
    assert_eq!(compiled.get("shown"), Some(Value::str("token: ***")));
}

#[test]
fn lists_dicts_and_subscripts() {
    let source = "\
xs = [1, 2, 3]
d = {'a': 1, 'b': 2}
first = xs[0]
last = xs[-1]
b = d['b']
";
    let compiled = compile(source);
    assert_eq!(compiled.get("first"), Some(Value::Int(1)));
    assert_eq!(compiled.get("last"), Some(Value::Int(3)));
    assert_eq!(compiled.get("b"), Some(Value::Int(2)));
}

// ----------------------------------------------------------------------
// Scoping and control flow
// ----------------------------------------------------------------------

#[test]
fn names_are_single_assignment() {
    let err = compile_err("a = 1\na = 2");
    assert!(matches!(err, CompileError::Compilation { .. }));
}

#[test]
fn if_elif_else_selects_one_arm() {
    let source = "\
cond = 3
if cond == 1:
    picked_one = True
elif cond == 3:
    picked_three = True
else:
    picked_other = True
";
    let compiled = compile(source);
    // Block scopes do not leak into the module scope.
    assert_eq!(compiled.get("picked_three"), None);
    assert_eq!(compiled.get("picked_one"), None);
}

#[test]
fn for_iterates_lists() {
    let source = "\
resource Host:
    name: str

for name in ['a', 'b']:
    Host(name)
";
    let compiled = compile(source);
    assert_eq!(compiled.model.len(), 2);
}

// ----------------------------------------------------------------------
// Resources
// ----------------------------------------------------------------------

#[test]
fn resources_deduplicate_by_index() {
    let source = "\
resource Host:
    name: str
    port: int = 22

a = Host('web')
b = Host('web')
same = a == b
";
    let compiled = compile(source);
    assert_eq!(compiled.model.len(), 1);
    assert_eq!(compiled.get("same"), Some(Value::Bool(true)));

    let instance = compiled.model.iter().next().unwrap();
    assert_eq!(&*instance.index, "Host[web]");
    assert_eq!(instance.properties.get("port"), Some(&Value::Int(22)));
}

#[test]
fn custom_constructors_populate_self() {
    let source = "\
resource Server:
    host: str
    port: int

    implement default(host: str):
        self.host = host
        if host == 'web':
            self.port = 80
        else:
            self.port = 8080

web = Server('web')
port = web.port
";
    let compiled = compile(source);
    assert_eq!(compiled.get("port"), Some(Value::Int(80)));
}

#[test]
fn named_constructors_are_callable() {
    let source = "\
resource Server:
    host: str
    port: int

    implement default(host: str, port: int):
        self.host = host
        self.port = port

    implement https(host: str):
        self.host = host
        self.port = 443

a = Server.https('secure')
p = a.port
";
    let compiled = compile(source);
    assert_eq!(compiled.get("p"), Some(Value::Int(443)));
}

#[test]
fn property_reassignment_fails() {
    let source = "\
resource Host:
    name: str

    implement default(name: str):
        self.name = name
        self.name = 'twice'

Host('a')
";
    assert!(matches!(
        compile_err(source),
        CompileError::Compilation { .. }
    ));
}

#[test]
fn missing_required_property_fails() {
    let source = "\
resource Host:
    name: str
    port: int

    implement default(name: str):
        self.name = name

Host('a')
";
    assert!(matches!(
        compile_err(source),
        CompileError::Compilation { .. }
    ));
}

#[test]
fn property_type_mismatch_fails() {
    let source = "\
resource Host:
    name: str

Host(42)
";
    assert!(matches!(
        compile_err(source),
        CompileError::Compilation { .. }
    ));
}

#[test]
fn resource_inheritance_merges_properties() {
    let source = "\
resource Base:
    name: str
    port: int = 1

resource Child(Base):
    extra: str

c = Child('x', 2, 'e')
port = c.port
extra = c.extra
";
    let compiled = compile(source);
    assert_eq!(compiled.get("port"), Some(Value::Int(2)));
    assert_eq!(compiled.get("extra"), Some(Value::str("e")));
}

#[test]
fn index_decorator_overrides_columns() {
    let source = "\
@index([\"name\", \"port\"])
resource Host:
    name: str
    port: int

a = Host('web', 1)
b = Host('web', 2)
same = a == b
";
    let compiled = compile(source);
    assert_eq!(compiled.model.len(), 2);
    assert_eq!(compiled.get("same"), Some(Value::Bool(false)));
}

#[test]
fn nested_resources_keep_identity() {
    let source = "\
resource Disk:
    name: str

resource Host:
    name: str
    disk: Disk

d = Disk('ssd')
h1 = Host('a', d)
h2 = Host('b', d)
same = h1.disk == h2.disk
";
    let compiled = compile(source);
    assert_eq!(compiled.get("same"), Some(Value::Bool(true)));
    assert_eq!(compiled.model.len(), 3);
}

#[test]
fn promises_read_as_promise_values() {
    let source = "\
resource Cert:
    name: str
    promise fingerprint: str

resource Site:
    name: str
    cert_print: str

c = Cert('tls')
s = Site('web', c.fingerprint)
";
    let compiled = compile(source);
    assert_eq!(compiled.model.len(), 2);
    let site = compiled.model.get(
        compiled
            .model
            .lookup("Site[web]")
            .expect("site instance missing"),
    );
    assert!(matches!(
        site.properties.get("cert_print"),
        Some(Value::Promise(_))
    ));
}

// ----------------------------------------------------------------------
// Typedefs and enums
// ----------------------------------------------------------------------

#[test]
fn typedef_refinement() {
    let compiled = compile("typedef PositiveInt int : self > 0\na = PositiveInt(5)");
    assert_eq!(compiled.get("a"), Some(Value::Int(5)));

    assert!(matches!(
        compile_err("typedef PositiveInt int : self > 0\na = PositiveInt(-1)"),
        CompileError::Compilation { .. }
    ));
    assert!(matches!(
        compile_err("typedef PositiveInt int : self > 0\na = PositiveInt('a')"),
        CompileError::Compilation { .. }
    ));
}

#[test]
fn typedefs_compose() {
    let source = "\
typedef PositiveInt int : self > 0
typedef Port PositiveInt : self < 65536
p = Port(443)
";
    let compiled = compile(source);
    assert_eq!(compiled.get("p"), Some(Value::Int(443)));

    let source = "\
typedef PositiveInt int : self > 0
typedef Port PositiveInt : self < 65536
p = Port(-1)
";
    assert!(matches!(
        compile_err(source),
        CompileError::Compilation { .. }
    ));
}

#[test]
fn typedef_checks_annotated_assignments() {
    let source = "\
typedef PositiveInt int : self > 0
n : PositiveInt = 5
";
    let compiled = compile(source);
    assert_eq!(compiled.get("n"), Some(Value::Int(5)));

    let source = "\
typedef PositiveInt int : self > 0
n : PositiveInt = -5
";
    assert!(matches!(
        compile_err(source),
        CompileError::Compilation { .. }
    ));
}

#[test]
fn enums_compare_within_their_type() {
    let source = "\
enum Color:
    red
    green

a = Color.red
same = a == Color.red
other = a == Color.green
";
    let compiled = compile(source);
    assert_eq!(compiled.get("same"), Some(Value::Bool(true)));
    assert_eq!(compiled.get("other"), Some(Value::Bool(false)));
}

#[test]
fn unknown_enum_member_fails() {
    assert!(matches!(
        compile_err("enum Color:\n    red\na = Color.blue"),
        CompileError::Compilation { .. }
    ));
}

// ----------------------------------------------------------------------
// std library
// ----------------------------------------------------------------------

#[test]
fn std_regex_match_is_anchored() {
    let source = "\
import std.regex
yes = std.regex.match('^ab', 'abcd')
no = std.regex.match('^xy', 'abcd')
";
    let compiled = compile(source);
    assert_eq!(compiled.get("yes"), Some(Value::Bool(true)));
    assert_eq!(compiled.get("no"), Some(Value::Bool(false)));
}

#[test]
fn std_env_secrets_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "k1=v1").unwrap();
    writeln!(file, "k2=v2").unwrap();

    let source = format!(
        "import std.env\nsecrets = std.env.secrets_file('{}')\nv1 = secrets['k1']\n",
        file.path().display()
    );
    let compiled = compile(&source);

    let Some(Value::Dict(secrets)) = compiled.get("secrets") else {
        panic!("expected a dict of secrets");
    };
    assert_eq!(secrets.len(), 2);
    assert_eq!(compiled.get("v1"), Some(Value::protected_str("v1")));
    let Some(Value::Str(v1)) = compiled.get("v1") else {
        unreachable!()
    };
    assert!(v1.protected);
}

#[test]
fn std_env_get() {
    std::env::set_var("STEWARD_TEST_PLAIN", "value");
    let compiled = compile("import std.env\nv = std.env.get('STEWARD_TEST_PLAIN')");
    assert_eq!(compiled.get("v"), Some(Value::str("value")));
}

#[test]
fn missing_env_var_is_a_plugin_error() {
    std::env::remove_var("STEWARD_TEST_MISSING");
    let err = compile_err("import std.env\nv = std.env.get('STEWARD_TEST_MISSING')");
    assert!(matches!(err, CompileError::Plugin { .. }));
}

#[test]
fn std_file_read_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "contents").unwrap();

    let source = format!(
        "import std.file\ntext = std.file.read_file('{}')\n",
        file.path().display()
    );
    let compiled = compile(&source);
    assert_eq!(compiled.get("text"), Some(Value::str("contents")));
}

#[test]
fn std_debug_msg_returns_none() {
    let compiled = compile("import std\nout = std.debug_msg('hello')");
    assert_eq!(compiled.get("out"), Some(Value::None));
}

#[test]
fn from_import_binds_plugins() {
    let compiled = compile("from std.regex import match\nok = match('^a', 'abc')");
    assert_eq!(compiled.get("ok"), Some(Value::Bool(true)));
}

// ----------------------------------------------------------------------
// Imports from the filesystem
// ----------------------------------------------------------------------

#[test]
fn imports_resolve_on_the_search_path() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("net");
    std::fs::create_dir(&pkg).unwrap();
    std::fs::write(
        pkg.join("__init__.stw"),
        "resource Port:\n    number: int\n\ndefault_port = 8080\n",
    )
    .unwrap();

    let entry = dir.path().join("main.stw");
    std::fs::write(
        &entry,
        "import net\np = net.Port(net.default_port)\nn = p.number\n",
    )
    .unwrap();

    let compiled = Compiler::with_search_paths(vec![dir.path().to_path_buf()])
        .compile_file(&entry)
        .expect("compilation failed");
    assert_eq!(compiled.get("n"), Some(Value::Int(8080)));
    assert_eq!(compiled.model.len(), 1);
}

#[test]
fn reimport_reuses_the_module_context() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("counted.stw"),
        "resource Marker:\n    name: str\n\nm = Marker('once')\n",
    )
    .unwrap();
    let entry = dir.path().join("main.stw");
    std::fs::write(&entry, "import counted\nimport counted\n").unwrap();

    let compiled = Compiler::with_search_paths(vec![dir.path().to_path_buf()])
        .compile_file(&entry)
        .expect("compilation failed");
    // The module was evaluated once; its resource exists exactly once.
    assert_eq!(compiled.model.len(), 1);
}

#[test]
fn unknown_module_fails() {
    let err = compile_err("import does.not.exist");
    assert!(matches!(err, CompileError::Compilation { .. }));
}

// ----------------------------------------------------------------------
// Errors carry spans
// ----------------------------------------------------------------------

#[test]
fn unknown_name_reports_location() {
    let err = compile_err("a = 1\nb = missing");
    let CompileError::Compilation { span, .. } = &err else {
        panic!("expected a compilation error");
    };
    assert_eq!(span.as_ref().map(|s| s.line), Some(1));
}
