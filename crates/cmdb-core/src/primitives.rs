//! # Primitives
//!
//! Fixed names and limits shared by every module: built-in object ids,
//! field names, collection names and the default flags of the idle pool.

// =============================================================================
// BUILT-IN OBJECTS
// =============================================================================

pub const BIZ: &str = "biz";
pub const SET: &str = "set";
pub const MODULE: &str = "module";
pub const HOST: &str = "host";
pub const PROCESS: &str = "process";

/// Objects that can never be inserted into or removed from the mainline.
pub const BUILT_IN_OBJECTS: [&str; 5] = [BIZ, SET, MODULE, HOST, PROCESS];

/// Classification the built-in objects are filed under.
pub const BIZ_TOPO_CLASSIFICATION: &str = "bk_biz_topo";
pub const HOST_MANAGE_CLASSIFICATION: &str = "bk_host_manage";

// =============================================================================
// ASSOCIATION KINDS
// =============================================================================

/// The association kind whose edges form the mainline.
pub const MAINLINE_KIND: &str = "bk_mainline";

/// Pre-defined association kinds seeded at bootstrap.
pub const PREDEFINED_KINDS: [(&str, &str); 6] = [
    (MAINLINE_KIND, "topo"),
    ("belong", "belong to"),
    ("group", "group"),
    ("run", "run on"),
    ("connect", "connect to"),
    ("default", "default"),
];

// =============================================================================
// FIELDS
// =============================================================================

pub const FIELD_ID: &str = "id";
pub const FIELD_OBJ_ID: &str = "bk_obj_id";
pub const FIELD_ASST_OBJ_ID: &str = "bk_asst_obj_id";
pub const FIELD_ASST_ID: &str = "bk_asst_id";
pub const FIELD_OBJ_ASST_ID: &str = "bk_obj_asst_id";
pub const FIELD_INST_ID: &str = "bk_inst_id";
pub const FIELD_INST_NAME: &str = "bk_inst_name";
pub const FIELD_ASST_INST_ID: &str = "bk_asst_inst_id";
pub const FIELD_PARENT_ID: &str = "bk_parent_id";
pub const FIELD_BIZ_ID: &str = "bk_biz_id";
pub const FIELD_BIZ_NAME: &str = "bk_biz_name";
pub const FIELD_SET_ID: &str = "bk_set_id";
pub const FIELD_SET_NAME: &str = "bk_set_name";
pub const FIELD_MODULE_ID: &str = "bk_module_id";
pub const FIELD_MODULE_NAME: &str = "bk_module_name";
pub const FIELD_HOST_ID: &str = "bk_host_id";
pub const FIELD_HOST_NAME: &str = "bk_host_innerip";
pub const FIELD_PROCESS_ID: &str = "bk_process_id";
pub const FIELD_PROCESS_NAME: &str = "bk_process_name";
pub const FIELD_DEFAULT: &str = "default";
pub const FIELD_DATA_STATUS: &str = "bk_data_status";
pub const FIELD_SERVICE_TEMPLATE_ID: &str = "service_template_id";
pub const FIELD_SET_TEMPLATE_ID: &str = "set_template_id";
pub const FIELD_SERVICE_CATEGORY_ID: &str = "service_category_id";
pub const FIELD_SERVICE_INSTANCE_ID: &str = "service_instance_id";

pub const DATA_STATUS_DISABLED: &str = "disabled";
pub const DATA_STATUS_ENABLE: &str = "enable";

// =============================================================================
// DEFAULT FLAGS
// =============================================================================

/// `default` value of an ordinary business, set or module.
pub const DEFAULT_FLAG_NORMAL: i64 = 0;
/// `default` value of the built-in business and of a business's idle set.
pub const DEFAULT_FLAG_RESOURCE: i64 = 1;
pub const DEFAULT_FLAG_IDLE_MODULE: i64 = 1;
pub const DEFAULT_FLAG_FAULT_MODULE: i64 = 2;
pub const DEFAULT_FLAG_RECYCLE_MODULE: i64 = 3;
/// Extra idle-pool modules configured by the platform.
pub const DEFAULT_FLAG_USER_MODULE: i64 = 4;

// =============================================================================
// COLLECTIONS OUTSIDE THE INSTANCE TABLES
// =============================================================================

pub const TABLE_OBJECTS: &str = "cc_ObjDes";
pub const TABLE_ATTRIBUTES: &str = "cc_ObjAttDes";
pub const TABLE_ATTRIBUTE_GROUPS: &str = "cc_PropertyGroup";
pub const TABLE_UNIQUES: &str = "cc_ObjectUnique";
pub const TABLE_ASSOCIATION_KINDS: &str = "cc_AsstDes";
pub const TABLE_MODEL_ASSOCIATIONS: &str = "cc_ObjAsst";
pub const TABLE_INST_ASSOCIATIONS: &str = "cc_InstAsst";
pub const TABLE_MODULE_HOST: &str = "cc_ModuleHostConfig";
pub const TABLE_SERVICE_INSTANCES: &str = "cc_ServiceInstance";
pub const TABLE_PROCESS_RELATIONS: &str = "cc_ProcessInstanceRelation";
pub const TABLE_HOST_APPLY_RULES: &str = "cc_HostApplyRule";
pub const TABLE_DYNAMIC_GROUPS: &str = "cc_DynamicGroup";
pub const TABLE_SET_TEMPLATES: &str = "cc_SetTemplate";
pub const TABLE_SET_SERVICE_TEMPLATE_RELATIONS: &str = "cc_SetServiceTemplateRelation";
pub const TABLE_SERVICE_TEMPLATES: &str = "cc_ServiceTemplate";
pub const TABLE_PROCESS_TEMPLATES: &str = "cc_ProcessTemplate";
pub const TABLE_SERVICE_CATEGORIES: &str = "cc_ServiceCategory";

// =============================================================================
// LIMITS
// =============================================================================

/// Default maximum number of topology levels, Host included.
pub const DEFAULT_MAX_TOPO_LEVEL: usize = 7;

/// Default chunk size of batched deletes.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Upper bound on steps of any mainline chain walk.
pub const MAX_CHAIN_WALK: usize = 64;

/// Characters stripped from an object name when it becomes an instance name.
pub const INST_NAME_FORBIDDEN_CHARS: [char; 6] = ['#', '/', ',', '>', '<', '|'];
